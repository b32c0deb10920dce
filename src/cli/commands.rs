//! CLI command definitions and handlers

use anyhow::Context;
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::cache::SqliteCacheStore;
use crate::core::client::RemoteEngine;
use crate::core::config::TranslationSettings;
use crate::core::credential::mask_key;
use crate::core::local::LocalModelEngine;
use crate::core::migration::{export_settings, import_settings, migrate_if_needed, reset_to_defaults};
use crate::core::models::ContentType;
use crate::core::ollama::OllamaModel;
use crate::core::orchestrator::TranslationManager;

/// Commands for Catalog Translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate a single text
    Translate {
        /// Text to translate
        text: String,

        /// Content category (TITLE, DESCRIPTION, COMMENT, TAG, ARTIST_NAME, OTHER)
        #[arg(short = 't', long, default_value = "TITLE")]
        content_type: ContentType,

        /// Video code to associate with the cache entry
        #[arg(long)]
        video_code: Option<String>,

        /// Ignore any cached translation
        #[arg(long)]
        force_fresh: bool,
    },

    /// Translate every line of a file in batches
    Batch {
        /// Input file, one text per line
        #[arg(short, long)]
        file: PathBuf,

        /// Content category
        #[arg(short = 't', long, default_value = "COMMENT")]
        content_type: ContentType,

        /// Video code to associate with the cache entries
        #[arg(long)]
        video_code: Option<String>,
    },

    /// Translate the tag list of one item
    Tags {
        /// Tags, in display order
        #[arg(required = true)]
        tags: Vec<String>,

        /// Video code to associate with the cache entry
        #[arg(long)]
        video_code: Option<String>,
    },

    /// Show usage statistics
    Stats,

    /// Inspect or prune the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the on-device model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Show, export, import or reset settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

/// Cache maintenance
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached translations for a video
    List {
        #[arg(long)]
        video_code: String,
    },
    /// Remove cached translations, optionally of one category
    Clear {
        #[arg(short = 't', long)]
        content_type: Option<ContentType>,
    },
    /// Remove one cached translation
    Delete {
        id: i64,
    },
}

/// On-device model lifecycle
#[derive(Subcommand, Debug)]
pub enum ModelAction {
    /// Report whether the model is present
    Status,
    /// Download the model
    Download,
    /// Delete the model
    Delete,
}

/// Settings management
#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print the effective settings
    Show,
    /// Export user-facing settings as JSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import settings exported earlier
    Import {
        file: PathBuf,
    },
    /// Fold a legacy preference file into the settings
    Migrate {
        legacy_file: PathBuf,
    },
    /// Restore defaults and clear the cache
    Reset,
}

/// Loaded settings plus where they came from
pub struct Session {
    config_path: Option<PathBuf>,
    settings: TranslationSettings,
}

impl Session {
    /// Load settings from the optional file and the environment
    pub fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = TranslationSettings::load(config_path.as_deref())
            .context("Failed to load translation settings")?;
        Ok(Self {
            config_path,
            settings,
        })
    }

    /// Wire cache, engines and manager for the current settings
    pub async fn manager(&self) -> anyhow::Result<TranslationManager> {
        build_manager(&self.settings).await
    }

    fn save(&self, settings: &TranslationSettings) -> anyhow::Result<()> {
        match &self.config_path {
            Some(path) => {
                settings.to_file(path)?;
                println!("💾 Settings saved to {}", path.display());
            }
            None => println!("ℹ️  No --config given, settings were not persisted"),
        }
        Ok(())
    }
}

/// Build a fully initialized manager
pub async fn build_manager(settings: &TranslationSettings) -> anyhow::Result<TranslationManager> {
    let cache = Arc::new(
        SqliteCacheStore::open(&settings.cache_path)
            .with_context(|| format!("Failed to open cache at {}", settings.cache_path.display()))?,
    );
    let remote = Arc::new(RemoteEngine::new()?);
    let model = Arc::new(OllamaModel::new(settings)?);
    let local = Arc::new(LocalModelEngine::new(model, settings.local.memory_cache_capacity));

    let manager = TranslationManager::new(cache, remote, local);
    manager.initialize(settings.clone()).await?;
    Ok(manager)
}

/// Handle single text translation
pub async fn handle_translate(
    session: &Session,
    text: String,
    content_type: ContentType,
    video_code: Option<String>,
    force_fresh: bool,
) -> anyhow::Result<()> {
    let manager = session.manager().await?;
    warn_if_disabled(&manager);

    let translated = manager
        .translate(&text, content_type, video_code.as_deref(), force_fresh)
        .await;
    println!("{}", translated);

    Ok(())
}

/// Handle batch translation of a text file
pub async fn handle_batch(
    session: &Session,
    file: PathBuf,
    content_type: ContentType,
    video_code: Option<String>,
) -> anyhow::Result<()> {
    let start_time = Instant::now();

    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let texts: Vec<String> = content.lines().map(str::to_string).collect();

    if texts.is_empty() {
        anyhow::bail!("No texts found in {}", file.display());
    }

    let manager = session.manager().await?;
    warn_if_disabled(&manager);

    info!("Translating {} lines from {}", texts.len(), file.display());
    let translated = manager
        .translate_batch(&texts, content_type, video_code.as_deref())
        .await;

    for line in &translated {
        println!("{}", line);
    }

    let changed = texts.iter().zip(&translated).filter(|(a, b)| a != b).count();
    info!(
        "Completed: {} of {} lines translated in {:?}",
        changed,
        texts.len(),
        start_time.elapsed()
    );

    Ok(())
}

/// Handle tag list translation
pub async fn handle_tags(
    session: &Session,
    tags: Vec<String>,
    video_code: Option<String>,
) -> anyhow::Result<()> {
    let manager = session.manager().await?;
    warn_if_disabled(&manager);

    let translated = manager.translate_tags(&tags, video_code.as_deref()).await;
    for (original, translated) in tags.iter().zip(&translated) {
        println!("{} → {}", original, translated);
    }

    Ok(())
}

/// Handle statistics command
pub async fn handle_stats(session: &Session) -> anyhow::Result<()> {
    let manager = session.manager().await?;
    let stats = manager.stats().await?;

    println!("📊 Translation statistics");
    println!("   Cached items: {}", stats.total_items);
    println!("   Billable characters: {}", stats.total_chars);

    if !stats.by_type.is_empty() {
        println!("\n   By content type:");
        for (content_type, count) in &stats.by_type {
            println!("     {:<14} {}", content_type.display_name(), count);
        }
    }

    if !stats.by_engine.is_empty() {
        println!("\n   By engine:");
        for (engine, count) in &stats.by_engine {
            println!("     {:<14} {}", engine, count);
        }
    }

    if !stats.api_key_usages.is_empty() {
        println!("\n   API keys:");
        for usage in &stats.api_key_usages {
            let cached = stats.by_api_key.get(&usage.fingerprint).copied().unwrap_or(0);
            println!(
                "     {}  {}/{} used, {} remaining, {} cached{}",
                usage.key,
                usage.chars_used,
                usage.monthly_limit,
                usage.remaining,
                cached,
                if usage.is_active { "" } else { " (inactive)" }
            );
        }
    }

    Ok(())
}

/// Handle cache maintenance commands
pub async fn handle_cache(session: &Session, action: CacheAction) -> anyhow::Result<()> {
    let manager = session.manager().await?;

    match action {
        CacheAction::List { video_code } => {
            let items = manager.cache_items_for_video(&video_code).await?;
            if items.is_empty() {
                println!("No cached translations for {}", video_code);
                return Ok(());
            }
            for item in items {
                println!(
                    "#{} [{}] ({}) {} → {}",
                    item.id,
                    item.content_type,
                    item.engine_used,
                    item.original_text,
                    item.translated_text
                );
            }
        }
        CacheAction::Clear { content_type } => {
            let cleared = match content_type {
                Some(content_type) => manager.clear_cache_by_type(content_type).await,
                None => manager.clear_cache().await,
            };
            if !cleared {
                anyhow::bail!("Failed to clear cache");
            }
            println!("✅ Cache cleared");
        }
        CacheAction::Delete { id } => {
            if manager.delete_cache_item(id).await {
                println!("✅ Deleted cache item #{}", id);
            } else {
                println!("⚠️  No cache item #{}", id);
            }
        }
    }

    Ok(())
}

/// Handle on-device model commands
pub async fn handle_model(session: &Session, action: ModelAction) -> anyhow::Result<()> {
    // explicit model commands must not race a background download
    let mut settings = session.settings.clone();
    settings.local.auto_download = false;
    let manager = build_manager(&settings).await?;

    match action {
        ModelAction::Status => {
            let status = manager.model_status().await;
            println!("Model {}: {}", settings.local.model, status);
        }
        ModelAction::Download => {
            let start_time = Instant::now();
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb.set_message(format!("Downloading {}", settings.local.model));

            let ok = manager.download_model().await;
            if ok {
                pb.finish_with_message("Downloaded");
                println!("✅ Model ready in {:?}", start_time.elapsed());
            } else {
                pb.finish_with_message("Failed");
                anyhow::bail!("Model download failed, see the log for details");
            }
        }
        ModelAction::Delete => {
            manager.model_status().await;
            if !manager.delete_model().await {
                anyhow::bail!("Failed to delete model");
            }
            println!("✅ Model deleted");
        }
    }

    Ok(())
}

/// Handle settings commands
pub async fn handle_settings(session: &Session, action: SettingsAction) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => {
            let mut shown = session.settings.clone();
            shown.api_keys = shown.api_keys.iter().map(|k| mask_key(k)).collect();
            println!("{}", serde_json::to_string_pretty(&shown)?);
            println!(
                "\nTranslation is {}",
                if session.settings.is_effectively_enabled() { "enabled" } else { "disabled" }
            );
        }
        SettingsAction::Export { output } => {
            let exported = serde_json::to_string_pretty(&export_settings(&session.settings))?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, exported).await?;
                    println!("✅ Settings exported to {}", path.display());
                }
                None => println!("{}", exported),
            }
        }
        SettingsAction::Import { file } => {
            let value: serde_json::Value = serde_json::from_str(&read_file(&file).await?)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let imported = import_settings(&session.settings, &value);
            imported.validate()?;
            println!("✅ Settings imported from {}", file.display());
            session.save(&imported)?;
        }
        SettingsAction::Migrate { legacy_file } => {
            let migrated = migrate_if_needed(&legacy_file, &session.settings)?;
            if migrated == session.settings {
                println!("Nothing to migrate");
                return Ok(());
            }
            migrated.validate()?;
            println!("✅ Legacy settings migrated");
            session.save(&migrated)?;
        }
        SettingsAction::Reset => {
            let manager = session.manager().await?;
            let reset = reset_to_defaults(&manager, &session.settings).await?;
            println!("✅ Settings reset and cache cleared");
            session.save(&reset)?;
        }
    }

    Ok(())
}

async fn read_file(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn warn_if_disabled(manager: &TranslationManager) {
    if !manager.is_enabled() {
        warn!("Translation is disabled or has no API key, returning input unchanged");
    }
}
