//! Player events

use crate::il::{PlayerId, Value, ValueError, Vector3};

use super::{impl_deniable, EventArgs, Marshal, Params};

/// Contains all information before a player is teleported
#[derive(Debug, Clone)]
pub struct TeleportingEventArgs {
    /// Player being teleported
    player: PlayerId,
    /// Destination
    position: Vector3,
    /// Whether the teleport may happen
    is_allowed: bool,
}

impl TeleportingEventArgs {
    /// Creates the arguments for a teleport of `player` to `position`
    pub fn new(player: PlayerId, position: Vector3, is_allowed: bool) -> Self {
        Self {
            player,
            position,
            is_allowed,
        }
    }
    /// Gets the player who's being teleported
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets the teleport destination
    pub fn position(&self) -> Vector3 {
        self.position
    }
    /// Sets the teleport destination
    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }
}

impl EventArgs for TeleportingEventArgs {
    const NAME: &'static str = "Teleporting";
}

impl Marshal for TeleportingEventArgs {
    const PARAMS: &'static [&'static str] = &["player", "position", "is_allowed"];
    const WRITABLE: &'static [&'static str] = &["position"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(params.next()?, params.next()?, params.next()?))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "position" => self.position.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

/// Contains all information before a player takes damage
#[derive(Debug, Clone)]
pub struct HurtingEventArgs {
    /// Player taking damage
    player: PlayerId,
    /// Damage amount
    amount: f64,
    /// Whether the damage is applied
    is_allowed: bool,
}

impl HurtingEventArgs {
    /// Creates the arguments for `amount` damage dealt to `player`
    pub fn new(player: PlayerId, amount: f64, is_allowed: bool) -> Self {
        Self {
            player,
            amount,
            is_allowed,
        }
    }
    /// Gets the player who's going to be hurt
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets the damage amount
    pub fn amount(&self) -> f64 {
        self.amount
    }
    /// Sets the damage amount. Not validated; negative amounts heal.
    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount;
    }
}

impl EventArgs for HurtingEventArgs {
    const NAME: &'static str = "Hurting";
}

impl Marshal for HurtingEventArgs {
    const PARAMS: &'static [&'static str] = &["player", "amount", "is_allowed"];
    const WRITABLE: &'static [&'static str] = &["amount"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(params.next()?, params.next()?, params.next()?))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "amount" => self.amount.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

/// Contains all information after a player has taken damage
#[derive(Debug, Clone)]
pub struct HurtEventArgs {
    /// Player that took damage
    player: PlayerId,
    /// Damage that was applied
    amount: f64,
}

impl HurtEventArgs {
    /// Creates the event arguments
    pub fn new(player: PlayerId, amount: f64) -> Self {
        Self { player, amount }
    }
    /// Gets the player who was hurt
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets the damage that was applied
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

impl EventArgs for HurtEventArgs {
    const NAME: &'static str = "Hurt";
}

impl Marshal for HurtEventArgs {
    const PARAMS: &'static [&'static str] = &["player", "amount"];

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(params.next()?, params.next()?))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "amount" => self.amount.into(),
            _ => return None,
        })
    }
}

/// Contains all information before a player activates the warhead panel
#[derive(Debug, Clone)]
pub struct ActivatingWarheadPanelEventArgs {
    /// Player trying to open the panel
    player: PlayerId,
    /// Whether the panel opens. Starts out as the host's own permission check.
    is_allowed: bool,
}

impl ActivatingWarheadPanelEventArgs {
    /// Creates the event arguments
    pub fn new(player: PlayerId, is_allowed: bool) -> Self {
        Self { player, is_allowed }
    }
    /// Gets the player who's trying to activate the warhead panel
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

impl EventArgs for ActivatingWarheadPanelEventArgs {
    const NAME: &'static str = "ActivatingWarheadPanel";
}

impl Marshal for ActivatingWarheadPanelEventArgs {
    const PARAMS: &'static [&'static str] = &["player", "is_allowed"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(params.next()?, params.next()?))
    }

    fn read(&self, field: &str) -> Option<Value> {
        Some(match field {
            "player" => self.player.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

/// Contains all information before spawning a player ragdoll
#[derive(Debug, Clone)]
pub struct SpawningRagdollEventArgs {
    /// Owner of the ragdoll
    player: PlayerId,
    /// Spawn position
    position: Vector3,
    /// Nickname shown on the ragdoll
    nickname: String,
    /// Host timestamp of the death
    creation_time: f64,
    /// Whether the ragdoll spawns
    is_allowed: bool,
}

impl SpawningRagdollEventArgs {
    /// Creates the event arguments
    pub fn new(
        player: PlayerId,
        position: Vector3,
        nickname: String,
        creation_time: f64,
        is_allowed: bool,
    ) -> Self {
        Self {
            player,
            position,
            nickname,
            creation_time,
            is_allowed,
        }
    }
    /// Gets the owner of the ragdoll
    pub fn player(&self) -> PlayerId {
        self.player
    }
    /// Gets the spawning position of the ragdoll
    pub fn position(&self) -> Vector3 {
        self.position
    }
    /// Sets the spawning position of the ragdoll
    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }
    /// Gets the ragdoll's nickname
    pub fn nickname(&self) -> &str {
        &self.nickname
    }
    /// Sets the ragdoll's nickname
    pub fn set_nickname(&mut self, nickname: impl Into<String>) {
        self.nickname = nickname.into();
    }
    /// Gets the ragdoll's creation time
    pub fn creation_time(&self) -> f64 {
        self.creation_time
    }
}

impl EventArgs for SpawningRagdollEventArgs {
    const NAME: &'static str = "SpawningRagdoll";
}

impl Marshal for SpawningRagdollEventArgs {
    const PARAMS: &'static [&'static str] = &[
        "player",
        "position",
        "nickname",
        "creation_time",
        "is_allowed",
    ];
    const WRITABLE: &'static [&'static str] = &["position", "nickname"];
    const DENIABLE: bool = true;

    fn construct(mut params: Params) -> Result<Self, ValueError> {
        Ok(Self::new(
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
            "position" => self.position.into(),
            "nickname" => self.nickname.as_str().into(),
            "creation_time" => self.creation_time.into(),
            "is_allowed" => self.is_allowed.into(),
            _ => return None,
        })
    }
}

impl_deniable!(
    TeleportingEventArgs,
    HurtingEventArgs,
    ActivatingWarheadPanelEventArgs,
    SpawningRagdollEventArgs,
);

#[cfg(test)]
mod tests {
    use crate::event::{Deniable, Marshal};
    use crate::il::{PlayerId, Value, Vector3};

    use super::*;

    #[test]
    /// Setters are reflected by field reads used for write-back
    fn test_mutable_fields() {
        let mut ev = SpawningRagdollEventArgs::new(
            PlayerId(1),
            Vector3::default(),
            "Dr. Bright".into(),
            12.5,
            true,
        );
        ev.set_nickname("Class-D");
        ev.set_position(Vector3::new(0.0, 5.0, 0.0));
        ev.deny();

        assert_eq!(Marshal::read(&ev, "nickname"), Some(Value::from("Class-D")));
        assert_eq!(
            Marshal::read(&ev, "position"),
            Some(Value::Vector(Vector3::new(0.0, 5.0, 0.0)))
        );
        assert_eq!(Marshal::read(&ev, "is_allowed"), Some(Value::Bool(false)));
        assert_eq!(Marshal::read(&ev, "creation_time"), Some(Value::Float(12.5)));
        assert_eq!(Marshal::read(&ev, "missing"), None);
        assert!(!ev.is_allowed());
    }

    #[test]
    /// Amounts are not validated
    fn test_hurting_accepts_any_amount() {
        let mut ev = HurtingEventArgs::new(PlayerId(1), 30.0, true);
        ev.set_amount(-5.0);
        assert_eq!(ev.amount(), -5.0);
    }
}
