//! Bonjour TXT record fields for `_hap._tcp`.
//!
//! Only the record contents are built here. Registering the service is left
//! to whatever mDNS responder the host runs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crate::traits::IdentityStore;
use hap_core::config::AccessoryConfig;
use hap_core::error::Result;
use sha2::{Digest, Sha512};

pub const SERVICE_TYPE: &str = "_hap._tcp.local.";

/// Value of the `pv` key.
pub const PROTOCOL_VERSION: &str = "1.1";

/// `sh`: base64 of the first four bytes of SHA-512(setup id ‖ accessory id).
pub fn setup_hash(setup_id: &str, mac: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(setup_id.as_bytes());
    hasher.update(mac.as_bytes());
    let digest = hasher.finalize();
    STANDARD.encode(&digest[..4])
}

/// TXT key/value pairs in advertisement order.
///
/// `id` and `sh` come from the store, so discovery shows the same accessory
/// id that pair-verify signs. `sf` is 1 while no controller is paired.
pub fn txt_record<S>(config: &AccessoryConfig, store: &S) -> Result<Vec<(String, String)>>
where
    S: IdentityStore + ?Sized,
{
    let accessory_id = store.accessory_id();
    let discoverable = !store.has_controllers()?;
    let hash = setup_hash(&config.setup_id, &accessory_id);

    Ok(vec![
        ("sf".to_string(), if discoverable { "1" } else { "0" }.to_string()),
        ("id".to_string(), accessory_id),
        ("md".to_string(), config.label.clone()),
        ("sh".to_string(), hash),
        ("c#".to_string(), config.configuration_index.to_string()),
        ("s#".to_string(), config.state_index.to_string()),
        ("ff".to_string(), "0".to_string()),
        ("ci".to_string(), config.category.to_string()),
        ("pv".to_string(), PROTOCOL_VERSION.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use crate::traits::MockIdentityStore;
    use hap_core::error::StoreError;
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    fn config() -> AccessoryConfig {
        AccessoryConfig::builder()
            .mac("AA:BB:CC:DD:EE:FF")
            .label("Test Lamp")
            .setup_id("7OSX")
            .configuration_index(3)
            .state_index(2)
            .category(5)
            .build()
            .unwrap()
    }

    fn value<'a>(txt: &'a [(String, String)], key: &str) -> &'a str {
        txt.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn setup_hash_matches_digest_prefix() {
        let digest = Sha512::digest(b"7OSXAA:BB:CC:DD:EE:FF");
        let expected = STANDARD.encode(&digest[..4]);

        let hash = setup_hash("7OSX", "AA:BB:CC:DD:EE:FF");
        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 8);
        assert!(hash.ends_with("=="));
    }

    #[test]
    fn setup_hash_depends_on_both_inputs() {
        let base = setup_hash("7OSX", "AA:BB:CC:DD:EE:FF");
        assert_ne!(base, setup_hash("7OSY", "AA:BB:CC:DD:EE:FF"));
        assert_ne!(base, setup_hash("7OSX", "AA:BB:CC:DD:EE:FE"));
    }

    #[test]
    fn txt_record_fields() {
        let store = MemoryStore::generate("AA:BB:CC:DD:EE:FF", &mut OsRng);
        let txt = txt_record(&config(), &store).unwrap();

        let keys: Vec<&str> = txt.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["sf", "id", "md", "sh", "c#", "s#", "ff", "ci", "pv"]);

        assert_eq!(value(&txt, "sf"), "1");
        assert_eq!(value(&txt, "id"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(value(&txt, "md"), "Test Lamp");
        assert_eq!(value(&txt, "sh"), setup_hash("7OSX", "AA:BB:CC:DD:EE:FF"));
        assert_eq!(value(&txt, "c#"), "3");
        assert_eq!(value(&txt, "s#"), "2");
        assert_eq!(value(&txt, "ff"), "0");
        assert_eq!(value(&txt, "ci"), "5");
        assert_eq!(value(&txt, "pv"), "1.1");
    }

    #[test]
    fn paired_accessory_is_not_discoverable() {
        let store = MemoryStore::generate("AA:BB:CC:DD:EE:FF", &mut OsRng);
        store.add_controller("ctrl", [1u8; 32], true).unwrap();

        let txt = txt_record(&config(), &store).unwrap();
        assert_eq!(value(&txt, "sf"), "0");
    }

    #[test]
    fn advertised_id_follows_stored_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.json");
        FileStore::open_or_create(&path, "11:11:11:11:11:11", &mut OsRng).unwrap();

        // Config names a different id than the one already on disk.
        let config = AccessoryConfig::builder()
            .mac("22:22:22:22:22:22")
            .setup_id("7OSX")
            .build()
            .unwrap();
        let store = FileStore::open_or_create(&path, &config.mac, &mut OsRng).unwrap();

        let txt = txt_record(&config, &store).unwrap();
        assert_eq!(value(&txt, "id"), store.accessory_id());
        assert_eq!(value(&txt, "id"), "11:11:11:11:11:11");
        assert_eq!(value(&txt, "sh"), setup_hash("7OSX", "11:11:11:11:11:11"));
    }

    #[test]
    fn store_failure_is_propagated() {
        let mut store = MockIdentityStore::new();
        store
            .expect_accessory_id()
            .return_const("AA:BB:CC:DD:EE:FF".to_string());
        store
            .expect_has_controllers()
            .returning(|| Err(StoreError::Poisoned.into()));

        assert!(txt_record(&config(), &store).is_err());
    }
}
