use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sv_store::item::{CardFields, FileFields, NoteFields, PasswordFields};
use sv_store::{ItemKind, ItemStore, NewItem, SqliteKv, StoreConfig};

#[derive(Parser)]
#[command(name = "sv")]
#[command(about = "SecureVault encrypted item store", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "securevault.db")]
    db: PathBuf,

    /// JSON store configuration (defaults apply when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Master password
    #[arg(long, global = true, env = "SV_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage vaults
    #[command(subcommand)]
    Vault(VaultCommand),

    /// Manage items
    #[command(subcommand)]
    Item(ItemCommand),

    /// Inspect the security audit log
    #[command(subcommand)]
    Audit(AuditCommand),
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Create a vault
    Create {
        name: String,
        #[arg(long, default_value = "#4a90d9")]
        color: String,
    },
    /// List vaults with item counts and lock state
    List,
    /// Lock a vault
    Lock { vault_id: String },
    /// Unlock a vault
    Unlock { vault_id: String },
    /// Delete an empty vault
    Delete { vault_id: String },
}

#[derive(Args)]
struct CommonItemArgs {
    /// Target vault
    #[arg(long)]
    vault: String,
    /// Display name
    #[arg(long)]
    name: String,
    /// Tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    favorite: bool,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum ItemCommand {
    /// Add a secure note
    AddNote {
        #[command(flatten)]
        common: CommonItemArgs,
        #[arg(long)]
        content: String,
    },
    /// Add a password entry
    AddPassword {
        #[command(flatten)]
        common: CommonItemArgs,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Add a payment card
    AddCard {
        #[command(flatten)]
        common: CommonItemArgs,
        #[arg(long)]
        number: String,
        #[arg(long)]
        expiry: Option<String>,
        #[arg(long)]
        cvv: Option<String>,
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        brand: Option<String>,
    },
    /// Import a file from disk
    AddFile {
        #[command(flatten)]
        common: CommonItemArgs,
        path: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },
    /// Show a decrypted item
    Get { item_id: String },
    /// List the items of a vault
    List { vault_id: String },
    /// Delete an item
    Delete { item_id: String },
    /// Write a media item's verified payload to disk
    Export { item_id: String, out: PathBuf },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Show retained events, newest first
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Drop every retained event, leaving a `log_cleared` marker
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sv_store=warn,sv=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let password = cli
        .password
        .clone()
        .ok_or_else(|| anyhow!("master password required (--password or SV_PASSWORD)"))?;

    let kv = Arc::new(SqliteKv::open(&cli.db).await?);
    let store = ItemStore::open(kv.clone(), &password, config)
        .await
        .context("failed to open store")?;
    tracing::debug!(db = %cli.db.display(), "store opened");

    let result = match cli.command {
        Commands::Vault(cmd) => vault_command(&store, cmd).await,
        Commands::Item(cmd) => item_command(&store, cmd).await,
        Commands::Audit(cmd) => audit_command(&store, cmd).await,
    };
    kv.close().await;
    result
}

async fn vault_command(store: &ItemStore, cmd: VaultCommand) -> Result<()> {
    let vaults = store.vaults();
    match cmd {
        VaultCommand::Create { name, color } => {
            print_json(&vaults.create_vault(&name, &color).await?)
        }
        VaultCommand::List => {
            let listing: Vec<_> = vaults
                .list_vaults()
                .await?
                .into_iter()
                .map(|v| {
                    serde_json::json!({
                        "id": v.id,
                        "name": v.name,
                        "color": v.color,
                        "items": v.item_count(),
                        "lock_state": v.lock_state(),
                    })
                })
                .collect();
            print_json(&listing)
        }
        VaultCommand::Lock { vault_id } => {
            store.lock_vault(&vault_id).await?;
            println!("Vault {vault_id} locked");
            Ok(())
        }
        VaultCommand::Unlock { vault_id } => {
            store.unlock_vault(&vault_id).await?;
            println!("Vault {vault_id} unlocked");
            Ok(())
        }
        VaultCommand::Delete { vault_id } => {
            vaults.delete_vault(&vault_id).await?;
            println!("Vault {vault_id} deleted");
            Ok(())
        }
    }
}

async fn item_command(store: &ItemStore, cmd: ItemCommand) -> Result<()> {
    match cmd {
        ItemCommand::AddNote { common, content } => {
            let kind = ItemKind::Note(NoteFields { content });
            add_item(store, common, kind, None).await
        }
        ItemCommand::AddPassword {
            common,
            secret,
            username,
            email,
            url,
        } => {
            let kind = ItemKind::Password(PasswordFields {
                username,
                secret,
                email,
                url,
            });
            add_item(store, common, kind, None).await
        }
        ItemCommand::AddCard {
            common,
            number,
            expiry,
            cvv,
            holder,
            brand,
        } => {
            let kind = ItemKind::Card(CardFields {
                number,
                expiry,
                cvv,
                holder_name: holder,
                brand,
            });
            add_item(store, common, kind, None).await
        }
        ItemCommand::AddFile {
            common,
            path,
            mime_type,
        } => {
            let content = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let kind = ItemKind::File(FileFields {
                mime_type,
                file_name: file_name(&path),
                ..Default::default()
            });
            add_item(store, common, kind, Some(content)).await
        }
        ItemCommand::Get { item_id } => print_json(&store.get(&item_id).await?),
        ItemCommand::List { vault_id } => print_json(&store.list(&vault_id).await?),
        ItemCommand::Delete { item_id } => {
            store.delete(&item_id).await?;
            println!("Item {item_id} deleted");
            Ok(())
        }
        ItemCommand::Export { item_id, out } => {
            let content = store.content(&item_id).await?;
            std::fs::write(&out, &content)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote {} bytes to {}", content.len(), out.display());
            Ok(())
        }
    }
}

async fn add_item(
    store: &ItemStore,
    common: CommonItemArgs,
    kind: ItemKind,
    content: Option<Vec<u8>>,
) -> Result<()> {
    let mut new_item = NewItem::new(common.name, kind).with_tags(common.tags);
    new_item.is_favorite = common.favorite;
    new_item.notes = common.notes;
    new_item.content = content;
    let item = store.create(&common.vault, new_item).await?;
    print_json(&item)
}

async fn audit_command(store: &ItemStore, cmd: AuditCommand) -> Result<()> {
    match cmd {
        AuditCommand::List { limit } => {
            let events: Vec<_> = store.audit().list().await?.into_iter().take(limit).collect();
            print_json(&events)
        }
        AuditCommand::Clear => {
            store
                .audit()
                .clear_with_marker(serde_json::json!({ "source": "cli" }))
                .await?;
            println!("Audit log cleared");
            Ok(())
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
