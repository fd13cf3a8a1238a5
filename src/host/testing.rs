//! In-memory host used by the tests: a handful of players, the SCP-914 machine, the warhead and
//! the server console, with method bodies shaped like the real host's

use std::collections::HashMap;
use std::sync::Arc;
use std::vec;

use crate::event::scp914::KnobSetting;
use crate::il::asm::assemble;
use crate::il::{ItemId, PlayerId, Value, ValueError, Vector3};

use super::{Host, HostError, MethodTable};

/// Host method listings
pub(crate) const METHODS: &[&str] = &[
    r#"
    .method PlayerMovement::teleport params 2 locals 0 void
        ldarg.0
        ldarg.1
        call Player::set_position 2 void
        ret
    "#,
    r#"
    .method PlayerStats::damage params 2 locals 1 void
        ldarg.0
        call Player::get_health 1 ret
        ldarg.1
        sub
        stloc.0
        ldarg.0
        ldloc.0
        call Player::set_health 2 void
        ret
    "#,
    r#"
    # args: player, upgrade_inventory, held_only, knob setting
    .method Scp914Upgrader::process_player params 4 locals 3 void
        ldarg.0
        call Scp914::output_position 1 ret
        stloc.0
        ldarg.0
        ldloc.0
        call Player::set_position 2 void
        ldarg.0
        ldarg.3
        call Scp914::upgrade_player 2 void
        ldarg.1
        brfalse DONE
        ldc.i 0
        stloc.1
    LOOP:
        ldloc.1
        ldarg.0
        call Player::item_count 1 ret
        clt
        brfalse DONE
        ldarg.0
        ldloc.1
        call Player::item_at 2 ret
        stloc.2
        ldloc.2
        ldarg.3
        call Scp914::upgrade_item 2 void
        ldloc.1
        ldc.i 1
        add
        stloc.1
        # the held item is the first one
        ldarg.2
        brfalse LOOP
    DONE:
        ret
    "#,
    r#"
    .method AlphaWarheadNukesitePanel::toggle_lever params 1 locals 0 void
        ldarg.0
        call Player::can_use_lever 1 ret
        brfalse DONE
        call Warhead::get_lever 0 ret
        not
        call Warhead::set_lever 1 void
    DONE:
        ret
    "#,
    r#"
    .method AlphaWarheadOutsitePanel::server_interact params 1 locals 1 void
        ldarg.0
        call Player::has_keycard 1 ret
        stloc.0
        ldloc.0
        brfalse DONE
        ldc.b true
        call Panel::set_enabled 1 void
    DONE:
        ret
    "#,
    r#"
    .method RagdollManager::spawn params 2 locals 2 void
        ldarg.0
        call Player::get_nickname 1 ret
        stloc.0
        call Time::now 0 ret
        stloc.1
        ldarg.0
        ldarg.1
        ldloc.0
        ldloc.1
        call Ragdoll::spawn 4 void
        ret
    "#,
    r#"
    .method ServerConsole::reload_server_name params 0 locals 0 void
        call Config::get_server_name 0 ret
        call Server::set_name 1 void
        ret
    "#,
];

/// Method table holding every listing in [`METHODS`]
pub(crate) fn methods() -> Arc<MethodTable> {
    let table = MethodTable::new();
    for source in METHODS {
        table.register(assemble(source).unwrap());
    }
    Arc::new(table)
}

/// State of one player
#[derive(Debug, Clone, Default)]
pub(crate) struct PlayerState {
    /// Display name
    pub nickname: String,
    /// Current position
    pub position: Vector3,
    /// Remaining health
    pub health: f64,
    /// Inventory
    pub items: Vec<ItemId>,
    /// Whether a keycard opening the warhead panel is held
    pub keycard: bool,
    /// Whether the lever may be used
    pub lever_access: bool,
}

/// A spawned ragdoll
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ragdoll {
    /// Player that died
    pub owner: PlayerId,
    /// Where the ragdoll lies
    pub position: Vector3,
    /// Name shown on the ragdoll
    pub nickname: String,
    /// World clock at spawn
    pub creation_time: f64,
}

/// Host world the natives operate on
#[derive(Debug, Default)]
pub(crate) struct World {
    /// Spawned players
    pub players: HashMap<PlayerId, PlayerState>,
    /// Next free player or item id
    next_id: u32,
    /// Where SCP-914 drops players
    pub output_position: Vector3,
    /// Players processed by SCP-914, with the setting used
    pub upgraded_players: Vec<(PlayerId, KnobSetting)>,
    /// Items processed by SCP-914, with the setting used
    pub upgraded_items: Vec<(ItemId, KnobSetting)>,
    /// Nuke lever position
    pub lever: bool,
    /// Whether the outside warhead panel is open
    pub panel_enabled: bool,
    /// Spawned ragdolls
    pub ragdolls: Vec<Ragdoll>,
    /// Seconds since the round started
    pub clock: f64,
    /// Name from the server config file
    pub configured_name: String,
    /// Name currently advertised
    pub server_name: String,
}

impl World {
    /// Empty world with a configured server name
    pub fn new() -> Self {
        Self {
            output_position: Vector3::new(0.0, 1.0, -20.0),
            clock: 42.0,
            configured_name: "Site-19".to_string(),
            ..Self::default()
        }
    }

    /// Adds a player
    pub fn spawn(&mut self, nickname: &str, health: f64) -> PlayerId {
        let id = self.next_id();
        self.players.insert(
            PlayerId(id),
            PlayerState {
                nickname: nickname.to_string(),
                health,
                ..PlayerState::default()
            },
        );
        PlayerId(id)
    }

    /// Gives `player` a new item
    pub fn give(&mut self, player: PlayerId) -> ItemId {
        let item = ItemId(self.next_id());
        self.player_mut(player).items.push(item);
        item
    }

    /// State of `player`
    pub fn player(&self, player: PlayerId) -> &PlayerState {
        &self.players[&player]
    }

    /// Mutable state of `player`
    pub fn player_mut(&mut self, player: PlayerId) -> &mut PlayerState {
        self.players.get_mut(&player).unwrap()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Looks up a player for a native
    fn lookup(&mut self, method: &str, player: PlayerId) -> Result<&mut PlayerState, HostError> {
        self.players
            .get_mut(&player)
            .ok_or_else(|| HostError::Native {
                method: method.to_string(),
                message: format!("no player #{}", player.0),
            })
    }
}

/// Typed access to native arguments
struct Args<'a> {
    /// Native signature
    method: &'a str,
    /// Remaining arguments
    values: vec::IntoIter<Value>,
}

impl Args<'_> {
    fn next<T: TryFrom<Value, Error = ValueError>>(&mut self) -> Result<T, HostError> {
        self.values
            .next()
            .unwrap_or_default()
            .try_into()
            .map_err(|source| HostError::BadArgument {
                method: self.method.to_string(),
                source,
            })
    }
}

impl Host for World {
    fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Option<Value>, HostError> {
        let mut args = Args {
            method,
            values: args.into_iter(),
        };
        let result: Value = match method {
            "Player::get_nickname" => {
                let p = args.next()?;
                self.lookup(method, p)?.nickname.clone().into()
            }
            "Player::set_position" => {
                let p = args.next()?;
                self.lookup(method, p)?.position = args.next()?;
                return Ok(None);
            }
            "Player::get_health" => {
                let p = args.next()?;
                self.lookup(method, p)?.health.into()
            }
            "Player::set_health" => {
                let p = args.next()?;
                self.lookup(method, p)?.health = args.next()?;
                return Ok(None);
            }
            "Player::item_count" => {
                let p = args.next()?;
                (self.lookup(method, p)?.items.len() as i64).into()
            }
            "Player::item_at" => {
                let p = args.next()?;
                let index: i64 = args.next()?;
                let items = &self.lookup(method, p)?.items;
                match items.get(index as usize) {
                    Some(item) => (*item).into(),
                    None => Value::Null,
                }
            }
            "Player::has_keycard" => {
                let p = args.next()?;
                self.lookup(method, p)?.keycard.into()
            }
            "Player::can_use_lever" => {
                let p = args.next()?;
                self.lookup(method, p)?.lever_access.into()
            }
            "Scp914::output_position" => self.output_position.into(),
            "Scp914::upgrade_player" => {
                let p = args.next()?;
                let setting = args.next()?;
                self.upgraded_players.push((p, setting));
                return Ok(None);
            }
            "Scp914::upgrade_item" => {
                let item = args.next()?;
                let setting = args.next()?;
                self.upgraded_items.push((item, setting));
                return Ok(None);
            }
            "Warhead::get_lever" => self.lever.into(),
            "Warhead::set_lever" => {
                self.lever = args.next()?;
                return Ok(None);
            }
            "Panel::set_enabled" => {
                self.panel_enabled = args.next()?;
                return Ok(None);
            }
            "Ragdoll::spawn" => {
                let ragdoll = Ragdoll {
                    owner: args.next()?,
                    position: args.next()?,
                    nickname: args.next()?,
                    creation_time: args.next()?,
                };
                self.ragdolls.push(ragdoll);
                return Ok(None);
            }
            "Time::now" => self.clock.into(),
            "Config::get_server_name" => self.configured_name.as_str().into(),
            "Server::get_name" => self.server_name.as_str().into(),
            "Server::set_name" => {
                self.server_name = args.next()?;
                return Ok(None);
            }
            _ => return Err(HostError::UnknownNative(method.to_string())),
        };
        Ok(Some(result))
    }
}
