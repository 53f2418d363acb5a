//! Item type system.
//!
//! `ItemKind` is a closed tagged union over the nine item variants. Every
//! per-variant decision (sensitive field list, validation, media handling,
//! audit payload) is an exhaustive `match`, so adding a variant fails to
//! compile until each of those sites handles it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Photo,
    Video,
    Audio,
    Document,
    Card,
    Identity,
    Password,
    File,
    Note,
}

impl ItemType {
    pub const ALL: [ItemType; 9] = [
        ItemType::Photo,
        ItemType::Video,
        ItemType::Audio,
        ItemType::Document,
        ItemType::Card,
        ItemType::Identity,
        ItemType::Password,
        ItemType::File,
        ItemType::Note,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Photo => "photo",
            ItemType::Video => "video",
            ItemType::Audio => "audio",
            ItemType::Document => "document",
            ItemType::Card => "card",
            ItemType::Identity => "identity",
            ItemType::Password => "password",
            ItemType::File => "file",
            ItemType::Note => "note",
        }
    }

    /// Media variants carry a payload digest instead of encrypted fields.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            ItemType::Photo
                | ItemType::Video
                | ItemType::Audio
                | ItemType::Document
                | ItemType::File
        )
    }

    /// Names of the fields that are envelope-encrypted at rest.
    pub fn sensitive_fields(self) -> &'static [&'static str] {
        match self {
            ItemType::Photo
            | ItemType::Video
            | ItemType::Audio
            | ItemType::Document
            | ItemType::File => &[],
            ItemType::Card => &["number", "expiry", "cvv", "holder_name"],
            ItemType::Identity => &[
                "first_name",
                "last_name",
                "date_of_birth",
                "id_number",
                "address",
            ],
            ItemType::Password => &["username", "secret", "email"],
            ItemType::Note => &["content"],
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| StoreError::Validation(format!("unrecognized item type: {s:?}")))
    }
}

// ── Variant fields ───────────────────────────────────────────────────────────
//
// `size` and `hash` on media variants are store-managed: the store overwrites
// them from the actual payload on every write.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoFields {
    #[serde(default)]
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub hash: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFields {
    #[serde(default)]
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub hash: String,
    pub duration_secs: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFields {
    #[serde(default)]
    pub size: u64,
    pub format: String,
    #[serde(default)]
    pub hash: String,
    pub duration_secs: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFields {
    #[serde(default)]
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub hash: String,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFields {
    #[serde(default)]
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub hash: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFields {
    pub number: String,
    pub expiry: Option<String>,
    pub cvv: Option<String>,
    pub holder_name: Option<String>,
    pub brand: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    pub first_name: String,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub id_number: Option<String>,
    pub address: Option<String>,
    /// e.g. "passport", "driver_license". Not encrypted.
    pub document_kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordFields {
    pub username: Option<String>,
    pub secret: String,
    pub email: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFields {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    Photo(PhotoFields),
    Video(VideoFields),
    Audio(AudioFields),
    Document(DocumentFields),
    Card(CardFields),
    Identity(IdentityFields),
    Password(PasswordFields),
    File(FileFields),
    Note(NoteFields),
}

/// Mutable view of the store-managed media fields.
pub(crate) struct MediaSlot<'a> {
    pub size: &'a mut u64,
    pub hash: &'a mut String,
}

impl ItemKind {
    /// Build a variant from a type name and a JSON object of its fields.
    pub fn from_parts(item_type: &str, fields: serde_json::Value) -> StoreResult<Self> {
        let item_type: ItemType = item_type.parse()?;
        let mut object = match fields {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(StoreError::Validation(format!(
                    "fields for {item_type} must be an object, got {other}"
                )))
            }
        };
        object.insert("type".into(), json!(item_type.as_str()));
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| StoreError::Validation(format!("invalid {item_type} fields: {e}")))
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            ItemKind::Photo(_) => ItemType::Photo,
            ItemKind::Video(_) => ItemType::Video,
            ItemKind::Audio(_) => ItemType::Audio,
            ItemKind::Document(_) => ItemType::Document,
            ItemKind::Card(_) => ItemType::Card,
            ItemKind::Identity(_) => ItemType::Identity,
            ItemKind::Password(_) => ItemType::Password,
            ItemKind::File(_) => ItemType::File,
            ItemKind::Note(_) => ItemType::Note,
        }
    }

    /// Stored payload digest, for media variants.
    pub fn content_hash(&self) -> Option<&str> {
        match self {
            ItemKind::Photo(f) => Some(&f.hash),
            ItemKind::Video(f) => Some(&f.hash),
            ItemKind::Audio(f) => Some(&f.hash),
            ItemKind::Document(f) => Some(&f.hash),
            ItemKind::File(f) => Some(&f.hash),
            ItemKind::Card(_) | ItemKind::Identity(_) | ItemKind::Password(_) | ItemKind::Note(_) => {
                None
            }
        }
    }

    /// Stored payload size in bytes, for media variants.
    pub fn content_size(&self) -> Option<u64> {
        match self {
            ItemKind::Photo(f) => Some(f.size),
            ItemKind::Video(f) => Some(f.size),
            ItemKind::Audio(f) => Some(f.size),
            ItemKind::Document(f) => Some(f.size),
            ItemKind::File(f) => Some(f.size),
            ItemKind::Card(_) | ItemKind::Identity(_) | ItemKind::Password(_) | ItemKind::Note(_) => {
                None
            }
        }
    }

    pub(crate) fn media_mut(&mut self) -> Option<MediaSlot<'_>> {
        match self {
            ItemKind::Photo(f) => Some(MediaSlot {
                size: &mut f.size,
                hash: &mut f.hash,
            }),
            ItemKind::Video(f) => Some(MediaSlot {
                size: &mut f.size,
                hash: &mut f.hash,
            }),
            ItemKind::Audio(f) => Some(MediaSlot {
                size: &mut f.size,
                hash: &mut f.hash,
            }),
            ItemKind::Document(f) => Some(MediaSlot {
                size: &mut f.size,
                hash: &mut f.hash,
            }),
            ItemKind::File(f) => Some(MediaSlot {
                size: &mut f.size,
                hash: &mut f.hash,
            }),
            ItemKind::Card(_) | ItemKind::Identity(_) | ItemKind::Password(_) | ItemKind::Note(_) => {
                None
            }
        }
    }

    /// Present sensitive values, named. Absent optional fields are skipped.
    pub(crate) fn sensitive_fields_mut(&mut self) -> Vec<(&'static str, &mut String)> {
        let mut out = Vec::new();
        match self {
            ItemKind::Photo(_)
            | ItemKind::Video(_)
            | ItemKind::Audio(_)
            | ItemKind::Document(_)
            | ItemKind::File(_) => {}
            ItemKind::Card(f) => {
                out.push(("number", &mut f.number));
                push_present(&mut out, "expiry", &mut f.expiry);
                push_present(&mut out, "cvv", &mut f.cvv);
                push_present(&mut out, "holder_name", &mut f.holder_name);
            }
            ItemKind::Identity(f) => {
                out.push(("first_name", &mut f.first_name));
                push_present(&mut out, "last_name", &mut f.last_name);
                push_present(&mut out, "date_of_birth", &mut f.date_of_birth);
                push_present(&mut out, "id_number", &mut f.id_number);
                push_present(&mut out, "address", &mut f.address);
            }
            ItemKind::Password(f) => {
                push_present(&mut out, "username", &mut f.username);
                out.push(("secret", &mut f.secret));
                push_present(&mut out, "email", &mut f.email);
            }
            ItemKind::Note(f) => {
                out.push(("content", &mut f.content));
            }
        }
        out
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        match self {
            ItemKind::Photo(f) => require(ItemType::Photo, "mime_type", &f.mime_type),
            ItemKind::Video(f) => require(ItemType::Video, "mime_type", &f.mime_type),
            ItemKind::Audio(f) => require(ItemType::Audio, "format", &f.format),
            ItemKind::Document(f) => require(ItemType::Document, "mime_type", &f.mime_type),
            ItemKind::File(f) => require(ItemType::File, "mime_type", &f.mime_type),
            ItemKind::Card(f) => require(ItemType::Card, "number", &f.number),
            ItemKind::Identity(f) => require(ItemType::Identity, "first_name", &f.first_name),
            ItemKind::Password(f) => require(ItemType::Password, "secret", &f.secret),
            ItemKind::Note(_) => Ok(()),
        }
    }

    /// Non-sensitive summary recorded in audit events.
    pub(crate) fn audit_details(&self) -> serde_json::Value {
        match self {
            ItemKind::Photo(f) => json!({ "mime_type": f.mime_type, "size": f.size }),
            ItemKind::Video(f) => json!({ "mime_type": f.mime_type, "size": f.size }),
            ItemKind::Audio(f) => json!({ "format": f.format, "size": f.size }),
            ItemKind::Document(f) => json!({ "mime_type": f.mime_type, "size": f.size }),
            ItemKind::File(f) => json!({ "mime_type": f.mime_type, "size": f.size }),
            ItemKind::Card(f) => json!({ "brand": f.brand }),
            ItemKind::Identity(f) => json!({ "document_kind": f.document_kind }),
            ItemKind::Password(f) => json!({ "url": f.url }),
            ItemKind::Note(_) => json!({}),
        }
    }
}

fn push_present<'a>(
    out: &mut Vec<(&'static str, &'a mut String)>,
    name: &'static str,
    field: &'a mut Option<String>,
) {
    if let Some(value) = field.as_mut() {
        out.push((name, value));
    }
}

fn require(item_type: ItemType, field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!(
            "{item_type} item requires a non-empty {field}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("item name must not be empty".into()));
    }
    Ok(())
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub vault_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub notes: Option<String>,
    /// Store-managed; incremented by every successful update.
    pub version: u64,
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl Item {
    pub fn item_type(&self) -> ItemType {
        self.kind.item_type()
    }
}

/// Input to `ItemStore::create`.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub tags: BTreeSet<String>,
    pub is_favorite: bool,
    pub notes: Option<String>,
    pub kind: ItemKind,
    /// Media payload; required for media variants, rejected otherwise.
    pub content: Option<Vec<u8>>,
}

impl NewItem {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            is_favorite: false,
            notes: None,
            kind,
            content: None,
        }
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn favorite(mut self) -> Self {
        self.is_favorite = true;
        self
    }
}

/// Partial update for `ItemStore::update`. `None` leaves a field untouched.
///
/// `fields` replaces the variant fields wholesale and must keep the item's
/// type; only sensitive values that actually changed are re-encrypted.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub is_favorite: Option<bool>,
    pub notes: Option<Option<String>>,
    pub fields: Option<ItemKind>,
    pub content: Option<Vec<u8>>,
    /// Reject the update with `Conflict` unless the stored version matches.
    pub expected_version: Option<u64>,
}

impl ItemPatch {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.is_favorite = Some(favorite);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn with_fields(mut self, fields: ItemKind) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn expecting_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Names of the top-level attributes this patch touches.
    pub fn touched(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.name.is_some() {
            out.push("name");
        }
        if self.tags.is_some() {
            out.push("tags");
        }
        if self.is_favorite.is_some() {
            out.push("is_favorite");
        }
        if self.notes.is_some() {
            out.push("notes");
        }
        if self.fields.is_some() {
            out.push("fields");
        }
        if self.content.is_some() {
            out.push("content");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_parse_case_insensitively() {
        for t in ItemType::ALL {
            assert_eq!(t.as_str().parse::<ItemType>().unwrap(), t);
            assert_eq!(t.as_str().to_uppercase().parse::<ItemType>().unwrap(), t);
        }
        assert!(matches!(
            "spaceship".parse::<ItemType>(),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn sensitive_field_lists_match_dispatch() {
        let mut card = ItemKind::Card(CardFields {
            number: "4111".into(),
            expiry: Some("12/30".into()),
            cvv: Some("123".into()),
            holder_name: Some("A. Holder".into()),
            brand: Some("visa".into()),
        });
        let names: Vec<_> = card.sensitive_fields_mut().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ItemType::Card.sensitive_fields());

        let mut pw = ItemKind::Password(PasswordFields {
            secret: "s".into(),
            ..Default::default()
        });
        let names: Vec<_> = pw.sensitive_fields_mut().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["secret"]);

        let mut photo = ItemKind::Photo(PhotoFields::default());
        assert!(photo.sensitive_fields_mut().is_empty());
        assert!(photo.media_mut().is_some());
    }

    #[test]
    fn media_types_are_exactly_those_with_hashes() {
        let kinds = [
            ItemKind::Photo(PhotoFields::default()),
            ItemKind::Video(VideoFields::default()),
            ItemKind::Audio(AudioFields::default()),
            ItemKind::Document(DocumentFields::default()),
            ItemKind::File(FileFields::default()),
            ItemKind::Card(CardFields::default()),
            ItemKind::Identity(IdentityFields::default()),
            ItemKind::Password(PasswordFields::default()),
            ItemKind::Note(NoteFields::default()),
        ];
        for kind in kinds {
            assert_eq!(kind.item_type().is_media(), kind.content_hash().is_some());
            assert_eq!(
                kind.item_type().is_media(),
                kind.item_type().sensitive_fields().is_empty()
            );
        }
    }

    #[test]
    fn per_variant_validation() {
        assert!(ItemKind::Card(CardFields::default()).validate().is_err());
        assert!(ItemKind::Password(PasswordFields {
            secret: "   ".into(),
            ..Default::default()
        })
        .validate()
        .is_err());
        assert!(ItemKind::Audio(AudioFields {
            format: "m4a".into(),
            ..Default::default()
        })
        .validate()
        .is_ok());
        assert!(ItemKind::Note(NoteFields::default()).validate().is_ok());
        assert!(validate_name("  ").is_err());
    }

    #[test]
    fn from_parts_builds_variants() {
        let kind = ItemKind::from_parts(
            "password",
            json!({ "username": "alice", "secret": "pw" }),
        )
        .unwrap();
        assert_eq!(kind.item_type(), ItemType::Password);

        assert!(matches!(
            ItemKind::from_parts("hologram", json!({})),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            ItemKind::from_parts("card", json!({ "expiry": "01/29" })),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn item_serializes_with_type_tag() {
        let now = Utc::now();
        let item = Item {
            id: "ab".repeat(16),
            vault_id: "v".into(),
            name: "Wifi".into(),
            created_at: now,
            updated_at: now,
            tags: BTreeSet::from(["home".to_string()]),
            is_favorite: true,
            notes: None,
            version: 1,
            kind: ItemKind::Note(NoteFields {
                content: "router pw".into(),
            }),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "note");
        assert_eq!(value["content"], "router pw");
        let back: Item = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }
}
