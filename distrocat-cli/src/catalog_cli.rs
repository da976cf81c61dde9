//! distrocat subcommands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::debug;

use distrocat_core::{
    Architecture, CatalogConfig, CatalogManager, DownloadOptions, DownloadProgress,
    ImportMetadata, RegistrySynchronizer, TemplateDescriptor,
};

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// List all templates
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show one template as JSON
    Show {
        /// Template name
        name: String,
    },

    /// Download a template (Ctrl-C cancels)
    Download {
        /// Template name
        name: String,

        /// Replace an artifact that is already available
        #[clap(long)]
        overwrite: bool,

        /// Expected sha256, overriding the catalog's
        #[clap(long, conflicts_with = "no_verify")]
        checksum: Option<String>,

        /// Skip checksum verification
        #[clap(long)]
        no_verify: bool,

        /// Give up after this many seconds
        #[clap(long)]
        timeout: Option<u64>,
    },

    /// Delete a template's artifact
    Remove {
        /// Template name
        name: String,
    },

    /// Re-hash a template's artifact and compare with the catalog
    Verify {
        /// Template name
        name: String,
    },

    /// Register a local archive as a template
    Import {
        /// Path to the archive
        path: PathBuf,

        /// Template name
        #[clap(long)]
        name: String,

        #[clap(long)]
        display_name: Option<String>,

        #[clap(long)]
        version: Option<String>,

        /// x64, arm64 or both
        #[clap(long)]
        arch: Option<Architecture>,
    },

    /// Refresh source URLs from the registry feed
    Sync {
        /// Ignore the cached feed
        #[clap(long)]
        force: bool,
    },

    /// Print storage locations
    Paths,
}

/// Table row for `list`
#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Display Name")]
    display_name: String,
    #[tabled(rename = "Arch")]
    architecture: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&TemplateDescriptor> for TemplateRow {
    fn from(descriptor: &TemplateDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            display_name: descriptor.display_name.clone(),
            architecture: descriptor.architecture.to_string(),
            size: descriptor
                .size_bytes
                .map(format_size)
                .unwrap_or_else(|| "-".to_string()),
            status: if descriptor.available {
                "available".to_string()
            } else {
                "-".to_string()
            },
        }
    }
}

impl CatalogCommand {
    pub async fn execute(self, config: CatalogConfig) -> Result<()> {
        let manager = CatalogManager::open(config).context("Failed to open catalog")?;

        match self {
            CatalogCommand::List { json } => execute_list(&manager, json),
            CatalogCommand::Show { name } => execute_show(&manager, &name),
            CatalogCommand::Download {
                name,
                overwrite,
                checksum,
                no_verify,
                timeout,
            } => {
                let mut options = DownloadOptions::new()
                    .overwrite(overwrite)
                    .verify_checksum(!no_verify)
                    .on_progress(print_progress);
                if let Some(checksum) = checksum {
                    options = options.expected_checksum(checksum);
                }
                if let Some(secs) = timeout {
                    options = options.timeout(Duration::from_secs(secs));
                }
                execute_download(Arc::new(manager), name, options).await
            }
            CatalogCommand::Remove { name } => {
                manager.remove_template(&name)?;
                println!("Removed {name}");
                Ok(())
            }
            CatalogCommand::Verify { name } => {
                if manager.verify_template(&name).await {
                    println!("{name}: OK");
                    Ok(())
                } else {
                    bail!("{name}: verification failed (run with --log-level info for details)")
                }
            }
            CatalogCommand::Import {
                path,
                name,
                display_name,
                version,
                arch,
            } => {
                let metadata = ImportMetadata {
                    display_name,
                    version,
                    architecture: arch,
                    ..Default::default()
                };
                let descriptor = manager
                    .import_external_artifact(&path, &name, metadata)
                    .await?;
                println!(
                    "Imported {} ({}, sha256 {})",
                    descriptor.name,
                    descriptor.size_bytes.map(format_size).unwrap_or_default(),
                    descriptor.sha256.unwrap_or_default()
                );
                Ok(())
            }
            CatalogCommand::Sync { force } => {
                let synchronizer = RegistrySynchronizer::new(manager.config())?;
                let report = synchronizer.sync(&manager, force).await?;
                println!(
                    "Feed has {} entries ({:?}); {} source URLs updated",
                    report.feed_entries,
                    report.source,
                    report.applied
                );
                for update in &report.planned {
                    println!("  {} -> {}", update.name, update.source_url);
                }
                Ok(())
            }
            CatalogCommand::Paths => {
                let paths = manager.storage_paths();
                println!("root:      {}", paths.root().display());
                println!("catalog:   {}", paths.catalog_file().display());
                println!("config:    {}", paths.config_file().display());
                println!("artifacts: {}", paths.artifact_dir().display());
                println!("registry:  {}", paths.registry_cache_file().display());
                Ok(())
            }
        }
    }
}

fn execute_list(manager: &CatalogManager, json: bool) -> Result<()> {
    let templates = manager.list_templates();

    if json {
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    if templates.is_empty() {
        println!("No templates in the catalog.");
        return Ok(());
    }

    let rows: Vec<TemplateRow> = templates.iter().map(TemplateRow::from).collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("{table}");
    Ok(())
}

fn execute_show(manager: &CatalogManager, name: &str) -> Result<()> {
    let Some(descriptor) = manager.get_template(name) else {
        bail!("Template '{name}' is not in the catalog");
    };
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

async fn execute_download(
    manager: Arc<CatalogManager>,
    name: String,
    options: DownloadOptions,
) -> Result<()> {
    let interrupt = {
        let manager = manager.clone();
        let name = name.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                manager.cancel_download(&name);
            }
        })
    };

    let result = manager.download(&name, options).await;
    interrupt.abort();
    eprintln!();

    match result {
        Ok(descriptor) => {
            println!(
                "Downloaded {} to {}",
                descriptor.name,
                descriptor
                    .local_file_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            println!("{e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_progress(progress: DownloadProgress) {
    let mut line = format!("\r{}", format_size(progress.downloaded_bytes));
    if let Some(total) = progress.total_bytes {
        line.push_str(&format!(" / {}", format_size(total)));
    }
    if let Some(percent) = progress.percent {
        line.push_str(&format!(" ({percent:.0}%)"));
    }
    line.push_str(&format!(" {}/s", format_size(progress.bytes_per_second as u64)));
    if let Some(eta) = progress.eta {
        line.push_str(&format!(" eta {}s", eta.as_secs()));
    }

    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{line}   ");
    let _ = stderr.flush();
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
