//! Identity store seam between the handshake layer and persistence.

use hap_core::error::Result;
use hap_crypto::ed25519::IdentityKeyPair;

/// Long-term identities known to this accessory.
///
/// Pair-verify only reads from the store. Pair-setup adds controllers.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityStore: Send + Sync {
    /// Accessory pairing identifier (`XX:XX:XX:XX:XX:XX`).
    fn accessory_id(&self) -> String;

    /// Accessory long-term signing key pair.
    fn accessory_keypair(&self) -> IdentityKeyPair;

    /// Long-term public key of a paired controller.
    fn lookup_controller(&self, controller_id: &str) -> Option<[u8; 32]>;

    /// Record a newly paired controller.
    fn add_controller(&self, controller_id: &str, public_key: [u8; 32], admin: bool) -> Result<()>;

    /// Forget a controller.
    fn remove_controller(&self, controller_id: &str) -> Result<()>;

    /// Whether any controller is paired.
    fn has_controllers(&self) -> Result<bool>;
}
