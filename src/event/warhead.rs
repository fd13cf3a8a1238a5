//! Warhead events

use crate::il::{PlayerId, Value, ValueError};

use super::{impl_deniable, EventArgs, Marshal, Params};

/// Contains all information before a player flips the warhead lever
#[derive(Debug, Clone)]
pub struct ChangingLeverStatusEventArgs {
    /// Player at the lever
    player: PlayerId,
    /// Lever state before the flip
    current_state: bool,
    /// Whether the lever flips
    is_allowed: bool,
}

impl ChangingLeverStatusEventArgs {
    /// Creates the event arguments
    pub fn new(player: PlayerId, current_state: bool, is_allowed: bool) -> Self {
        Self {
            player,
            current_state,
            is_allowed,
        }
    }
    /// Gets the player who's changing the lever status
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets the lever state before the change
    pub fn current_state(&self) -> bool {
        self.current_state
    }
}

impl EventArgs for ChangingLeverStatusEventArgs {
    const NAME: &'static str = "ChangingLeverStatus";
}

impl Marshal for ChangingLeverStatusEventArgs {
    const PARAMS: &'static [&'static str] = &["player", "current_state", "is_allowed"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(params.next()?, params.next()?, params.next()?))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "current_state" => self.current_state.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

impl_deniable!(ChangingLeverStatusEventArgs);
