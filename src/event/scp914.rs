//! SCP-914 events

use std::fmt;

use crate::il::{value::mismatch, ItemId, PlayerId, Value, ValueError, Vector3};

use super::{impl_deniable, EventArgs, Marshal, Params};

/// Refinement mode of the SCP-914 machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum KnobSetting {
    /// Strongest downgrade
    Rough = 0,
    /// Downgrade
    Coarse = 1,
    /// Swap for an item of the same tier
    OneToOne = 2,
    /// Upgrade
    Fine = 3,
    /// Strongest upgrade
    VeryFine = 4,
}

impl fmt::Display for KnobSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rough => "Rough",
            Self::Coarse => "Coarse",
            Self::OneToOne => "1:1",
            Self::Fine => "Fine",
            Self::VeryFine => "Very Fine",
        };
        f.write_str(name)
    }
}

impl From<KnobSetting> for Value {
    fn from(v: KnobSetting) -> Self {
        Self::Int(v as i64)
    }
}

impl TryFrom<Value> for KnobSetting {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        let raw = match v {
            Value::Int(raw) => raw,
            other => return Err(mismatch("knob setting", &other)),
        };
        Ok(match raw {
            0 => Self::Rough,
            1 => Self::Coarse,
            2 => Self::OneToOne,
            3 => Self::Fine,
            4 => Self::VeryFine,
            value => {
                return Err(ValueError::OutOfRange {
                    target: "knob setting",
                    value,
                })
            }
        })
    }
}

/// Contains all information before SCP-914 upgrades a player
#[derive(Debug, Clone)]
pub struct UpgradingPlayerEventArgs {
    /// Player inside the intake chamber
    player: PlayerId,
    /// Whether the player's inventory is upgraded too
    upgrade_items: bool,
    /// Whether only the held item is upgraded
    held_only: bool,
    /// Machine setting
    knob_setting: KnobSetting,
    /// Where the player comes out
    output_position: Vector3,
    /// Whether the player is upgraded
    is_allowed: bool,
}

impl UpgradingPlayerEventArgs {
    /// Creates the event arguments
    pub fn new(
        player: PlayerId,
        upgrade_items: bool,
        held_only: bool,
        knob_setting: KnobSetting,
        output_position: Vector3,
        is_allowed: bool,
    ) -> Self {
        Self {
            player,
            upgrade_items,
            held_only,
            knob_setting,
            output_position,
            is_allowed,
        }
    }
    /// Gets the player being upgraded
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets whether items in the inventory are upgraded along with the player
    pub fn upgrade_items(&self) -> bool {
        self.upgrade_items
    }
    /// Sets whether the inventory is upgraded
    pub fn set_upgrade_items(&mut self, upgrade_items: bool) {
        self.upgrade_items = upgrade_items;
    }
    /// Gets whether only the held item is upgraded
    pub fn held_only(&self) -> bool {
        self.held_only
    }
    /// Sets whether only the held item is upgraded
    pub fn set_held_only(&mut self, held_only: bool) {
        self.held_only = held_only;
    }
    /// Gets the setting used for this player. Changing it does not touch the machine itself.
    pub fn knob_setting(&self) -> KnobSetting {
        self.knob_setting
    }
    /// Sets the setting used for this player
    pub fn set_knob_setting(&mut self, knob_setting: KnobSetting) {
        self.knob_setting = knob_setting;
    }
    /// Gets the position the player is moved to
    pub fn output_position(&self) -> Vector3 {
        self.output_position
    }
    /// Sets where the player comes out
    pub fn set_output_position(&mut self, output_position: Vector3) {
        self.output_position = output_position;
    }
}

impl EventArgs for UpgradingPlayerEventArgs {
    const NAME: &'static str = "UpgradingPlayer";
}

impl Marshal for UpgradingPlayerEventArgs {
    const PARAMS: &'static [&'static str] = &[
        "player",
        "upgrade_items",
        "held_only",
        "knob_setting",
        "output_position",
        "is_allowed",
    ];
    const WRITABLE: &'static [&'static str] =
        &["upgrade_items", "held_only", "knob_setting", "output_position"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(
            params.next()?,
            params.next()?,
            params.next()?,
            params.next()?,
            params.next()?,
            params.next()?,
        ))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "upgrade_items" => self.upgrade_items.into(),
            "held_only" => self.held_only.into(),
            "knob_setting" => self.knob_setting.into(),
            "output_position" => self.output_position.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

/// Contains all information before SCP-914 upgrades an item in a player's inventory
#[derive(Debug, Clone)]
pub struct UpgradingInventoryItemEventArgs {
    /// Owner of the item
    player: PlayerId,
    /// Item being upgraded
    item: ItemId,
    /// Setting used for this item
    knob_setting: KnobSetting,
    /// Whether the item is upgraded
    is_allowed: bool,
}

impl UpgradingInventoryItemEventArgs {
    /// Creates the event arguments
    pub fn new(player: PlayerId, item: ItemId, knob_setting: KnobSetting, is_allowed: bool) -> Self {
        Self {
            player,
            item,
            knob_setting,
            is_allowed,
        }
    }
    /// Gets the owner of the item
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets the item being upgraded
    pub fn item(&self) -> ItemId {
        self.item
    }
    /// Gets the setting used for this item only
    pub fn knob_setting(&self) -> KnobSetting {
        self.knob_setting
    }
    /// Sets the setting used for this item
    pub fn set_knob_setting(&mut self, knob_setting: KnobSetting) {
        self.knob_setting = knob_setting;
    }
}

impl EventArgs for UpgradingInventoryItemEventArgs {
    const NAME: &'static str = "UpgradingInventoryItem";
}

impl Marshal for UpgradingInventoryItemEventArgs {
    const PARAMS: &'static [&'static str] = &["player", "item", "knob_setting", "is_allowed"];
    const WRITABLE: &'static [&'static str] = &["knob_setting"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(
            params.next()?,
            params.next()?,
            params.next()?,
            params.next()?,
        ))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "item" => self.item.into(),
            "knob_setting" => self.knob_setting.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

impl_deniable!(UpgradingPlayerEventArgs, UpgradingInventoryItemEventArgs);
