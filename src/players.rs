//! Last-known chain address per player.
//!
//! The identity plumbing records an address here whenever it observes a
//! linked wallet; fulfillment reads it back when deciding where to mint.
use crate::error::CheckoutError;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub struct PlayerDirectory {
    tree: sled::Tree,
}

impl PlayerDirectory {
    pub fn new(db: &sled::Db) -> Result<Self, CheckoutError> {
        Ok(Self {
            tree: db.open_tree("player_addresses")?,
        })
    }

    pub fn record_address(&self, user_id: &str, address: &str) -> Result<(), CheckoutError> {
        self.tree.insert(user_id.as_bytes(), address.as_bytes())?;
        Ok(())
    }

    /// The player's last observed address. The zero address means the player
    /// was seen but never linked, so it reads the same as no record at all.
    pub fn last_address(&self, user_id: &str) -> Result<Option<String>, CheckoutError> {
        let Some(raw) = self.tree.get(user_id.as_bytes())? else {
            return Ok(None);
        };
        let address = String::from_utf8(raw.to_vec())
            .map_err(|_| CheckoutError::Codec("stored address is not utf-8".into()))?;

        if address == ZERO_ADDRESS {
            return Ok(None);
        }
        Ok(Some(address))
    }
}
