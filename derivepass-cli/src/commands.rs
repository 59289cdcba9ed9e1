//! Command implementations.

use crate::OptionArgs;
use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Local};
use derivepass_core::presets::{self, PasswordOptions};
use derivepass_core::sync::{CycleReport, HttpTransport};
use derivepass_core::{
    compute_password, platform, ClientConfig, MasterSecret, RemoteSyncEngine, SiteRecord,
    SyncScheduler, Vault,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Context {
    config: ClientConfig,
}

impl Context {
    pub fn new(config_path: Option<PathBuf>, store: Option<PathBuf>) -> Result<Self> {
        let mut config = match &config_path {
            Some(path) => ClientConfig::load(path),
            None => ClientConfig::load_default(),
        }
        .context("Failed to load configuration")?;

        if store.is_some() {
            config.store_path = store;
        }
        Ok(Self { config })
    }

    fn open_vault(&self) -> Result<Vault> {
        match &self.config.store_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            None => {
                platform::ensure_data_dir()?;
            }
        }

        let vault = Vault::open_default(&self.config)
            .with_context(|| format!("Failed to open {}", self.config.store_path().display()))?;
        Ok(vault)
    }

    async fn unlocked_vault(&self) -> Result<Vault> {
        let vault = self.open_vault()?;
        let master = prompt_master()?;
        let migrated = vault.unlock(master).await?;
        if migrated > 0 {
            eprintln!("Migrated {} legacy site(s)", migrated);
        }
        Ok(vault)
    }
}

fn prompt_master() -> Result<MasterSecret> {
    let master = rpassword::prompt_password("Master password: ")?;
    Ok(MasterSecret::new(master))
}

fn engine(vault: &Vault) -> Result<RemoteSyncEngine> {
    let transport = HttpTransport::new()?;
    Ok(RemoteSyncEngine::new(
        Arc::new(transport),
        vault.store().clone(),
    ))
}

impl OptionArgs {
    /// Apply the overrides on top of `base`
    fn merge(self, base: PasswordOptions) -> PasswordOptions {
        PasswordOptions {
            allowed_chars: self.allowed.unwrap_or(base.allowed_chars),
            required_chars: self.required.unwrap_or(base.required_chars),
            password_len: self.length.unwrap_or(base.password_len),
        }
    }
}

/// A site on its preset's options (or the defaults), with overrides applied
fn new_site(domain: String, login: String, revision: u32, options: OptionArgs) -> SiteRecord {
    let base = presets::lookup(domain.trim())
        .map(|preset| preset.options.clone())
        .unwrap_or_default();
    let options = options.merge(base);

    SiteRecord {
        domain,
        login,
        revision,
        allowed_chars: options.allowed_chars,
        required_chars: options.required_chars,
        password_len: options.password_len,
    }
}

fn describe(report: &CycleReport) -> String {
    format!(
        "fetched {}, applied {}, pushed {}",
        report.fetched, report.applied, report.pushed
    )
}

/// Push a local change right away when the device is linked
async fn sync_if_linked(vault: &Vault) -> Result<()> {
    let engine = engine(vault)?;
    if !engine.status()?.linked {
        return Ok(());
    }

    match engine.run_cycle().await {
        Ok(report) => info!("Synced: {}", describe(&report)),
        Err(e) => warn!("Change saved locally, sync failed: {}", e),
    }
    Ok(())
}

pub async fn derive(domain: String, login: String, revision: u32, options: OptionArgs) -> Result<()> {
    let site = new_site(domain, login, revision, options).validate()?;
    let master = prompt_master()?;

    let password =
        tokio::task::spawn_blocking(move || compute_password(&master, &site)).await??;
    println!("{}", password);
    Ok(())
}

pub async fn add(
    ctx: &Context,
    domain: String,
    login: String,
    revision: u32,
    options: OptionArgs,
) -> Result<()> {
    let site = new_site(domain, login, revision, options);
    let vault = ctx.unlocked_vault().await?;

    let id = vault.add_site(site)?;
    println!("{}", id);
    sync_if_linked(&vault).await
}

pub async fn list(ctx: &Context) -> Result<()> {
    let vault = ctx.unlocked_vault().await?;

    for record in vault.sites()? {
        match &record.decrypted {
            Some(site) => println!(
                "{}  {}  {}  #{}",
                record.id(),
                site.domain,
                site.login,
                site.revision
            ),
            None => println!("{}  <not readable with this master password>", record.id()),
        }
    }
    Ok(())
}

pub async fn edit(
    ctx: &Context,
    id: &str,
    login: Option<String>,
    revision: Option<u32>,
    options: OptionArgs,
) -> Result<()> {
    let vault = ctx.unlocked_vault().await?;
    let current = vault
        .site(id)?
        .decrypted
        .context("Site is not readable with this master password")?;

    let merged = options.merge(current.options());
    let site = SiteRecord {
        login: login.unwrap_or(current.login),
        revision: revision.unwrap_or(current.revision),
        allowed_chars: merged.allowed_chars,
        required_chars: merged.required_chars,
        password_len: merged.password_len,
        domain: current.domain,
    };

    vault.update_site(id, site)?;
    sync_if_linked(&vault).await
}

pub async fn remove(ctx: &Context, id: &str) -> Result<()> {
    let vault = ctx.unlocked_vault().await?;
    vault.remove_site(id)?;
    sync_if_linked(&vault).await
}

pub async fn password(ctx: &Context, id: &str) -> Result<()> {
    let vault = ctx.unlocked_vault().await?;
    let password = vault.password_for(id).await?;
    println!("{}", password);
    Ok(())
}

pub fn presets() {
    for preset in presets::all() {
        let options = &preset.options;
        println!(
            "{:<20} allowed={} required={} length={}",
            preset.domain,
            options.allowed_chars,
            if options.required_chars.is_empty() {
                "-"
            } else {
                options.required_chars.as_str()
            },
            options.password_len
        );
    }
}

pub async fn link(ctx: &Context, host: &str, username: &str) -> Result<()> {
    let vault = ctx.open_vault()?;
    let engine = engine(&vault)?;

    let password = rpassword::prompt_password(format!("Relay password for {}: ", username))?;
    engine
        .authorize(host, username, &password)
        .await
        .with_context(|| format!("Failed to link to {}", host))?;

    let report = engine.run_cycle().await?;
    println!("Linked to {} ({})", host, describe(&report));
    Ok(())
}

pub async fn unlink(ctx: &Context) -> Result<()> {
    let vault = ctx.open_vault()?;
    engine(&vault)?.unlink().await?;
    println!("Unlinked");
    Ok(())
}

pub async fn sync(ctx: &Context) -> Result<()> {
    let vault = ctx.open_vault()?;
    let report = engine(&vault)?.run_cycle().await.context("Sync failed")?;
    println!("Synced: {}", describe(&report));
    if report.skipped > 0 {
        println!("Skipped {} invalid remote object(s)", report.skipped);
    }
    Ok(())
}

pub fn status(ctx: &Context) -> Result<()> {
    let vault = ctx.open_vault()?;
    let status = engine(&vault)?.status()?;

    match status.host {
        Some(host) if status.linked => {
            println!("Linked to {}", host);
            match status
                .last_synced_at
                .filter(|at| *at > 0)
                .and_then(DateTime::from_timestamp_millis)
            {
                Some(at) => println!(
                    "Last synced {}",
                    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
                ),
                None => println!("Never synced"),
            }
        }
        _ => println!("Not linked"),
    }
    Ok(())
}

pub async fn watch(ctx: &Context) -> Result<()> {
    let vault = ctx.open_vault()?;
    let engine = Arc::new(engine(&vault)?);
    if !engine.status()?.linked {
        bail!("Not linked; run `derivepass link` first");
    }

    let interval = ctx.config.sync_interval();
    let scheduler = SyncScheduler::spawn(engine, interval);
    scheduler.trigger();
    eprintln!(
        "Syncing every {}s, press Ctrl-C to stop",
        interval.as_secs()
    );

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(length: Option<u32>) -> OptionArgs {
        OptionArgs {
            length,
            ..OptionArgs::default()
        }
    }

    #[test]
    fn test_new_site_uses_preset() {
        let site = new_site("paypal.com".into(), "alice".into(), 1, overrides(None));
        assert_eq!(site.required_chars, "@");
        assert_eq!(site.password_len, 20);
        assert_eq!(site.allowed_chars, presets::DEFAULT_ALLOWED);
    }

    #[test]
    fn test_overrides_win_over_preset() {
        let site = new_site("paypal.com".into(), "alice".into(), 2, overrides(Some(32)));
        assert_eq!(site.required_chars, "@");
        assert_eq!(site.password_len, 32);
        assert_eq!(site.revision, 2);
    }

    #[test]
    fn test_unknown_domain_gets_defaults() {
        let site = new_site("example.com".into(), "alice".into(), 1, overrides(None));
        assert!(site.has_default_options());
    }
}
