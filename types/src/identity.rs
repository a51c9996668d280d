//! Chain identities and the local client's role in a game.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 20-byte chain address.
///
/// Equality is byte equality, so two renderings of the same address that only
/// differ in hex case compare equal once parsed.
pub use ethers_core::types::Address;

/// Parse an address with or without the `0x` prefix, in any hex case.
pub fn parse_address(value: &str) -> Result<Address, Error> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(Error::InvalidAddress(value.to_string()));
    }
    Address::from_str(digits).map_err(|_| Error::InvalidAddress(value.to_string()))
}

/// Relationship of the local client to a game's two configured identities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Joiner,
    Spectator,
}

/// The (creator, joiner) pair a game was configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    pub creator: Address,
    pub joiner: Address,
}

impl Players {
    pub fn new(creator: Address, joiner: Address) -> Self {
        Self { creator, joiner }
    }

    /// Returns true if `address` is one of the two players.
    pub fn contains(&self, address: &Address) -> bool {
        *address == self.creator || *address == self.joiner
    }

    /// Role of `local` in this game.
    pub fn role_of(&self, local: Option<&Address>) -> Result<Role, Error> {
        resolve_role(local, &self.creator, &self.joiner)
    }
}

/// Resolve the local role.
///
/// Fails with [Error::IdentityUnavailable] when no identity is connected; an
/// identity matching neither player is a [Role::Spectator]. The creator match
/// is checked first.
pub fn resolve_role(
    local: Option<&Address>,
    creator: &Address,
    joiner: &Address,
) -> Result<Role, Error> {
    let local = local.ok_or(Error::IdentityUnavailable)?;
    if local == creator {
        Ok(Role::Creator)
    } else if local == joiner {
        Ok(Role::Joiner)
    } else {
        Ok(Role::Spectator)
    }
}
