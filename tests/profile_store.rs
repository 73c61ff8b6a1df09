use std::fs;

use tempfile::TempDir;
use tradecouncil::profile::store::ProfileStore;
use tradecouncil::profile::{GlobalSwitch, ModuleConfig, StrategyProfile};
use tradecouncil::signals::ModuleKind;

#[test]
fn save_then_reload_preserves_module_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("strategy_profile.json");
    let store = ProfileStore::open(&path);

    let mut profile = (*store.snapshot()).clone();
    profile.modules.insert("hybrid_reasoning".into(), ModuleConfig::new(true, 1.5, "DEEP"));
    profile.modules.insert("quant_analysis".into(), ModuleConfig::new(false, 0.7, "STANDARD"));
    profile.global_switch = GlobalSwitch::Active;
    store.save(profile, "tester").unwrap();

    let reopened = ProfileStore::open(&path);
    let p = reopened.snapshot();
    assert_eq!(p.module(ModuleKind::Hybrid), ModuleConfig::new(true, 1.5, "DEEP"));
    assert_eq!(p.module(ModuleKind::Quant), ModuleConfig::new(false, 0.7, "STANDARD"));
    assert_eq!(p.global_switch, GlobalSwitch::Active);
    assert_eq!(p.meta.updated_by, "tester");
}

#[test]
fn external_edit_is_picked_up_on_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("strategy_profile.json");
    let store = ProfileStore::open(&path);
    assert!(store.snapshot().is_paused());

    let mut edited = StrategyProfile::factory_default();
    edited.global_switch = GlobalSwitch::Active;
    fs::write(&path, serde_json::to_string_pretty(&edited).unwrap()).unwrap();

    store.reload();
    assert!(!store.snapshot().is_paused());
}

#[test]
fn invalid_save_is_refused_and_keeps_current() {
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::open(dir.path().join("p.json"));
    let before = store.snapshot();
    let mut bad = (*before).clone();
    bad.modules.clear();
    assert!(store.save(bad, "tester").is_err());
    assert_eq!(*store.snapshot(), *before);
}

#[test]
fn module_config_for_unknown_module_is_disabled() {
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::open(dir.path().join("p.json"));
    let cfg = store.module_config(ModuleKind::Risk);
    assert!(!cfg.enabled);
    assert_eq!(cfg.weight, 0.0);
}

#[test]
fn concurrent_readers_see_whole_snapshots() {
    use std::sync::Arc;
    use std::thread;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProfileStore::open(dir.path().join("p.json")));
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..20 {
                let w = 1.0 + i as f64;
                store.update_module_state(ModuleKind::Hybrid, true, Some(w)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let p = store.snapshot();
                    assert!(p.validate().is_ok());
                    assert_eq!(p.modules.len(), 3);
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(store.snapshot().module(ModuleKind::Hybrid).weight, 20.0);
}
