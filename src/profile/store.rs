//! Durable, hot-reloadable strategy profile store.
//!
//! Writes go to `<path>.tmp`, are fsynced, then renamed over the live file,
//! so a reader of the file never sees a truncated profile. In memory the
//! profile lives behind an `Arc` that is swapped whole: readers clone the
//! pointer and keep a consistent snapshot for as long as they need it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::logging::{log, log_config_anomaly, obj, v_str, Domain, Level};
use crate::signals::ModuleKind;

use super::{ModuleConfig, ProfileError, ProfileMeta, StrategyProfile};

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    current: RwLock<Arc<StrategyProfile>>,
    version: AtomicU64,
    writer: Mutex<()>,
}

impl ProfileStore {
    /// Open the store, regenerating factory defaults when the file is missing
    /// or unreadable. Never fails: a broken profile is a configuration anomaly,
    /// not a reason to stop.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = Self {
            current: RwLock::new(Arc::new(StrategyProfile::factory_default())),
            path,
            version: AtomicU64::new(0),
            writer: Mutex::new(()),
        };
        store.reload();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots swapped in since the store was opened.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<StrategyProfile> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the live file and swap it in. Holds the writer lock so a
    /// concurrent save cannot be overwritten by an older read.
    pub fn reload(&self) -> Arc<StrategyProfile> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        match read_profile(&self.path) {
            Ok(profile) => {
                let profile = Arc::new(profile);
                self.swap(Arc::clone(&profile));
                profile
            }
            Err(err) => self.recover_locked(&err),
        }
    }

    /// Stamp, persist atomically, then publish a new profile.
    pub fn save(&self, profile: StrategyProfile, author: &str) -> Result<Arc<StrategyProfile>, ProfileError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.save_locked(profile, author)
    }

    pub fn module_config(&self, kind: ModuleKind) -> ModuleConfig {
        self.snapshot().module(kind)
    }

    /// Toggle one module and optionally change its weight. Negative weights clamp to zero.
    pub fn update_module_state(
        &self,
        kind: ModuleKind,
        enabled: bool,
        weight: Option<f64>,
    ) -> Result<Arc<StrategyProfile>, ProfileError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut profile = (*self.snapshot()).clone();
        let entry = profile
            .modules
            .entry(kind.config_key().to_string())
            .or_insert_with(|| ModuleConfig::new(false, 0.0, "STANDARD"));
        entry.enabled = enabled;
        if let Some(w) = weight {
            entry.weight = if w.is_finite() { w.max(0.0) } else { 0.0 };
        }
        self.save_locked(profile, "API_UPDATE")
    }

    // Caller holds `writer`.
    fn save_locked(&self, mut profile: StrategyProfile, author: &str) -> Result<Arc<StrategyProfile>, ProfileError> {
        profile.validate()?;
        profile.meta = ProfileMeta::stamped(author);
        write_atomic(&self.path, &profile)?;
        let profile = Arc::new(profile);
        self.swap(Arc::clone(&profile));
        log(
            Level::Info,
            Domain::Config,
            "profile_saved",
            obj(&[
                ("path", v_str(&self.path.to_string_lossy())),
                ("updated_by", v_str(author)),
            ]),
        );
        Ok(profile)
    }

    fn swap(&self, next: Arc<StrategyProfile>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    // Caller holds `writer`.
    fn recover_locked(&self, err: &ProfileError) -> Arc<StrategyProfile> {
        let path = self.path.to_string_lossy().to_string();
        if err.is_missing_file() {
            log(
                Level::Warn,
                Domain::Config,
                "profile_missing",
                obj(&[("path", v_str(&path)), ("action", v_str("writing factory defaults"))]),
            );
        } else {
            log_config_anomaly(&path, &format!("{}; reverting to factory defaults", err));
            if self.path.exists() {
                let quarantine = self.path.with_extension("corrupt");
                if let Err(e) = fs::rename(&self.path, &quarantine) {
                    log_config_anomaly(&path, &format!("quarantine failed: {}", e));
                }
            }
        }

        let defaults = StrategyProfile::factory_default();
        match self.save_locked(defaults.clone(), "SYSTEM_INIT") {
            Ok(saved) => saved,
            Err(e) => {
                log_config_anomaly(&path, &format!("could not persist defaults: {}", e));
                let defaults = Arc::new(defaults);
                self.swap(Arc::clone(&defaults));
                defaults
            }
        }
    }
}

fn read_profile(path: &Path) -> Result<StrategyProfile, ProfileError> {
    let raw = fs::read_to_string(path)?;
    let profile: StrategyProfile = serde_json::from_str(&raw)?;
    profile.validate()?;
    Ok(profile)
}

fn write_atomic(path: &Path, profile: &StrategyProfile) -> Result<(), ProfileError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        let body = serde_json::to_string_pretty(profile)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
