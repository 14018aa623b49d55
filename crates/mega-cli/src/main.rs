//! mega: command-line client for the encrypted cloud drive.
//!
//! Credentials come from the environment (MEGA_USER / MEGA_PASSWD, plus
//! MEGA_MFA_CODE for MFA accounts); `login` stores a session dump so the
//! other commands never need the password again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::EnvFilter;

use mega_client::{ClientConfig, Mega, TransferOptions};

#[derive(Parser, Debug)]
#[command(
    name = "mega",
    version,
    about = "End-to-end-encrypted cloud storage client",
    long_about = "mega: authenticate, browse the encrypted drive, and move files with \
                  chunked parallel transfers. The service never sees plaintext."
)]
struct Cli {
    /// Path to a toml config file (api_url, workers, timeouts, ...)
    #[arg(long, short = 'c', env = "MEGA_CONFIG")]
    config: Option<PathBuf>,

    /// Session dump file written by `login`
    #[arg(long, env = "MEGA_SESSION_FILE", default_value = ".mega-session")]
    session: PathBuf,

    /// Log filter (e.g. "info" or "mega_client=debug")
    #[arg(long, env = "MEGA_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in with MEGA_USER / MEGA_PASSWD and save the session
    Login,
    /// Invalidate and remove the saved session
    Logout,
    /// List a folder
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Show handles, sizes and timestamps
        #[arg(long, short)]
        long: bool,
    },
    /// Download a file
    Get {
        remote: String,
        /// Destination path (default: the remote basename)
        local: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        local: PathBuf,
        /// Destination folder (default: the root)
        #[arg(default_value = "")]
        folder: String,
    },
    /// Create a folder
    Mkdir { path: String },
    /// Move a node into another folder
    Mv { from: String, to_folder: String },
    /// Rename a node
    Rename { path: String, name: String },
    /// Move a node to trash, or destroy it outright
    Rm {
        path: String,
        #[arg(long)]
        destroy: bool,
    },
    /// Export a public link
    Link {
        path: String,
        /// Embed the decryption key in the link
        #[arg(long)]
        key: bool,
    },
    /// Show account information
    User,
    /// Show storage quota
    Quota,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).context("invalid log filter")?)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let mega = Mega::with_config(config)?;

    match cli.command {
        Commands::Login => login(&mega, &cli.session).await,
        Commands::Logout => {
            resume(&mega, &cli.session).await?;
            mega.logout().await?;
            let _ = std::fs::remove_file(&cli.session);
            println!("logged out");
            Ok(())
        }
        Commands::Ls { path, long } => {
            resume(&mega, &cli.session).await?;
            let node = mega.resolve_path(&path)?;
            let entries = if node.is_dir() {
                mega.children(&node)?
            } else {
                vec![node]
            };
            for entry in entries {
                if long {
                    println!(
                        "{} {:>12} {:>11} {}{}",
                        entry.handle,
                        entry.size,
                        entry.timestamp,
                        entry.name,
                        if entry.is_dir() { "/" } else { "" }
                    );
                } else {
                    println!("{}{}", entry.name, if entry.is_dir() { "/" } else { "" });
                }
            }
            Ok(())
        }
        Commands::Get { remote, local } => {
            resume(&mega, &cli.session).await?;
            let node = mega.resolve_path(&remote)?;
            if node.is_dir() {
                bail!("{remote} is a folder");
            }
            let dest = local.unwrap_or_else(|| PathBuf::from(&node.name));
            let (opts, bar) = progress_options();
            let written = mega.download_to(&node, &dest, &opts).await?;
            bar.finish_and_clear();
            println!("{} -> {} ({written} bytes)", remote, dest.display());
            Ok(())
        }
        Commands::Put { local, folder } => {
            resume(&mega, &cli.session).await?;
            let parent = mega.resolve_path(&folder)?;
            if !parent.is_dir() {
                bail!("{folder} is not a folder");
            }
            let (opts, bar) = progress_options();
            let node = mega.upload(&local, &parent, None, &opts).await?;
            bar.finish_and_clear();
            println!("{} -> {} ({} bytes)", local.display(), node.name, node.size);
            Ok(())
        }
        Commands::Mkdir { path } => {
            resume(&mega, &cli.session).await?;
            let (parent_path, name) = split_parent(&path)?;
            let parent = mega.resolve_path(parent_path)?;
            let node = mega.mkdir(&parent, name).await?;
            println!("created {} ({})", path, node.handle);
            Ok(())
        }
        Commands::Mv { from, to_folder } => {
            resume(&mega, &cli.session).await?;
            let node = mega.resolve_path(&from)?;
            let target = mega.resolve_path(&to_folder)?;
            if !target.is_dir() {
                bail!("{to_folder} is not a folder");
            }
            mega.move_node(&node, &target).await?;
            println!("moved {from} -> {to_folder}");
            Ok(())
        }
        Commands::Rename { path, name } => {
            resume(&mega, &cli.session).await?;
            let node = mega.resolve_path(&path)?;
            mega.rename(&node, &name).await?;
            println!("renamed {path} -> {name}");
            Ok(())
        }
        Commands::Rm { path, destroy } => {
            resume(&mega, &cli.session).await?;
            let node = mega.resolve_path(&path)?;
            mega.delete(&node, destroy).await?;
            println!(
                "{} {path}",
                if destroy { "destroyed" } else { "trashed" }
            );
            Ok(())
        }
        Commands::Link { path, key } => {
            resume(&mega, &cli.session).await?;
            let node = mega.resolve_path(&path)?;
            println!("{}", mega.export_link(&node, key).await?);
            Ok(())
        }
        Commands::User => {
            resume(&mega, &cli.session).await?;
            let user = mega.get_user().await?;
            println!("id:    {}", user.id);
            println!("email: {}", user.email);
            println!("name:  {}", user.name);
            Ok(())
        }
        Commands::Quota => {
            resume(&mega, &cli.session).await?;
            let quota = mega.quota().await?;
            println!(
                "used {} of {} bytes ({:.1}%)",
                quota.used_bytes,
                quota.total_bytes,
                quota.used_bytes as f64 / quota.total_bytes.max(1) as f64 * 100.0
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config: {}", path.display()))
        }
        None => Ok(ClientConfig::default()),
    }
}

async fn login(mega: &Mega, session_file: &Path) -> Result<()> {
    let user = std::env::var("MEGA_USER").context("MEGA_USER not set")?;
    let password =
        SecretString::from(std::env::var("MEGA_PASSWD").context("MEGA_PASSWD not set")?);

    match std::env::var("MEGA_MFA_CODE").ok().filter(|c| !c.is_empty()) {
        Some(code) => {
            mega.multi_factor_login(&user, password.expose_secret(), &code)
                .await?
        }
        None => mega.login(&user, password.expose_secret()).await?,
    }

    let dump = mega.dump_session()?;
    std::fs::write(session_file, &dump)
        .with_context(|| format!("writing session file: {}", session_file.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(session_file, std::fs::Permissions::from_mode(0o600))?;
    }
    println!("logged in as {user}");
    Ok(())
}

async fn resume(mega: &Mega, session_file: &Path) -> Result<()> {
    let dump = std::fs::read_to_string(session_file)
        .with_context(|| format!("no session at {}; run `mega login`", session_file.display()))?;
    mega.session_login(dump.trim()).await?;
    Ok(())
}

fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        bail!("empty path");
    }
    Ok(match trimmed.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", trimmed),
    })
}

fn progress_options() -> (TransferOptions, ProgressBar) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {bytes}/{total_bytes} {bytes_per_sec}")
            .expect("static template"),
    );
    let cb_bar = bar.clone();
    let opts = TransferOptions {
        progress: Some(Arc::new(move |done, total| {
            cb_bar.set_length(total);
            cb_bar.set_position(done);
        })),
        ..Default::default()
    };
    (opts, bar)
}
