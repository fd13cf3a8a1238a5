//! The patches shipped with the framework.
//!
//! Each descriptor targets one host method by signature and raises its events at fixed anchors in
//! that method's body. A host build whose method no longer has the expected shape fails that one
//! patch with an anchor error; the rest still apply.

use crate::config::FrameworkConfig;
use crate::event::player::{
    ActivatingWarheadPanelEventArgs, HurtEventArgs, HurtingEventArgs, SpawningRagdollEventArgs,
    TeleportingEventArgs,
};
use crate::event::scp914::{UpgradingInventoryItemEventArgs, UpgradingPlayerEventArgs};
use crate::event::warhead::ChangingLeverStatusEventArgs;
use crate::il::{Constant, MethodRef, OpCode, Slot};
use crate::instrument::{Anchor, Deny, Emit, Inject, Pattern, Postfix, Source, Splice};

use super::PatchDescriptor;

/// Moves a player
pub const TELEPORT: &str = "PlayerMovement::teleport";
/// Applies damage to a player
pub const DAMAGE: &str = "PlayerStats::damage";
/// Runs one player through SCP-914
pub const PROCESS_PLAYER: &str = "Scp914Upgrader::process_player";
/// Flips the nuke lever
pub const TOGGLE_LEVER: &str = "AlphaWarheadNukesitePanel::toggle_lever";
/// Opens the outside warhead panel
pub const SERVER_INTERACT: &str = "AlphaWarheadOutsitePanel::server_interact";
/// Leaves a ragdoll behind a dead player
pub const SPAWN_RAGDOLL: &str = "RagdollManager::spawn";
/// Rebuilds the advertised server name
pub const RELOAD_SERVER_NAME: &str = "ServerConsole::reload_server_name";

/// Scratch local holding the machine's knob setting while one item is processed
const CURRENT_SETTING: Slot = Slot::Scratch("current_setting");

/// Every built-in patch, in application order
pub fn patches(config: &FrameworkConfig) -> Vec<PatchDescriptor> {
    let mut patches = vec![
        teleporting(),
        hurting(),
        changing_lever_status(),
        activating_warhead_panel(),
        spawning_ragdoll(),
        upgrading_player(),
    ];
    if config.is_name_tracking_enabled {
        patches.push(server_name_tracking(&config.name_tracking_tag));
    }
    patches
}

/// `Teleporting` before the position is set
fn teleporting() -> PatchDescriptor {
    PatchDescriptor::new("teleporting", TELEPORT).with(
        Splice::new::<TeleportingEventArgs>(Anchor::start())
            .source(Slot::Arg(0))
            .source(Slot::Arg(1))
            .source(true)
            .deny(Deny::Return)
            .write_back("position", Slot::Arg(1)),
    )
}

/// `Hurting` before damage is applied and `Hurt` after it.
///
/// The postfix goes in first so the deny branch of `Hurting` lands behind it: a denied hit
/// raises no `Hurt`.
fn hurting() -> PatchDescriptor {
    PatchDescriptor::new("hurting", DAMAGE)
        .with(Postfix::raise::<HurtEventArgs>(vec![
            Slot::Arg(0).into(),
            Slot::Arg(1).into(),
        ]))
        .with(
            Splice::new::<HurtingEventArgs>(Anchor::start())
                .source(Slot::Arg(0))
                .source(Slot::Arg(1))
                .source(true)
                .deny(Deny::Return)
                .write_back("amount", Slot::Arg(1)),
        )
}

/// `ChangingLeverStatus` once the player passed the access check
fn changing_lever_status() -> PatchDescriptor {
    let access_check = Anchor::new(Pattern::Calls("Player::can_use_lever")).offset(1);
    PatchDescriptor::new("changing_lever_status", TOGGLE_LEVER).with(
        Splice::new::<ChangingLeverStatusEventArgs>(Anchor::new(Pattern::Calls(
            "Warhead::get_lever",
        )))
        .source(Slot::Arg(0))
        .source(Source::Call(
            MethodRef::returning("Warhead::get_lever", 0),
            vec![],
        ))
        .source(true)
        .deny(Deny::BranchTargetOf(access_check)),
    )
}

/// `ActivatingWarheadPanel` with the keycard check as initial allowed-flag.
///
/// Subscribers can open the panel for a player without a keycard, so the flag is written back
/// instead of gating a deny branch.
fn activating_warhead_panel() -> PatchDescriptor {
    PatchDescriptor::new("activating_warhead_panel", SERVER_INTERACT).with(
        Splice::new::<ActivatingWarheadPanelEventArgs>(
            Anchor::new(Pattern::StoresLocal(0)).offset(1),
        )
        .source(Slot::Arg(0))
        .source(Slot::Local(0))
        .write_back("is_allowed", Slot::Local(0)),
    )
}

/// `SpawningRagdoll` once nickname and creation time are known
fn spawning_ragdoll() -> PatchDescriptor {
    PatchDescriptor::new("spawning_ragdoll", SPAWN_RAGDOLL).with(
        Splice::new::<SpawningRagdollEventArgs>(Anchor::new(Pattern::StoresLocal(1)).offset(1))
            .source(Slot::Arg(0))
            .source(Slot::Arg(1))
            .source(Slot::Local(0))
            .source(Slot::Local(1))
            .source(true)
            .deny(Deny::Return)
            .write_back("position", Slot::Arg(1))
            .write_back("nickname", Slot::Local(0)),
    )
}

/// `UpgradingPlayer` before the player is moved and `UpgradingInventoryItem` per item.
///
/// An item subscriber may change the knob setting for its own item only: the machine's setting
/// is saved before the item event and restored after the item is processed or skipped.
fn upgrading_player() -> PatchDescriptor {
    let after_item = Anchor::new(Pattern::Calls("Scp914::upgrade_item")).offset(1);
    PatchDescriptor::new("upgrading_player", PROCESS_PLAYER)
        .with(
            Splice::new::<UpgradingPlayerEventArgs>(Anchor::new(Pattern::StoresLocal(0)).offset(1))
                .source(Slot::Arg(0))
                .source(Slot::Arg(1))
                .source(Slot::Arg(2))
                .source(Slot::Arg(3))
                .source(Slot::Local(0))
                .source(true)
                .deny(Deny::Return)
                .write_back("upgrade_items", Slot::Arg(1))
                .write_back("held_only", Slot::Arg(2))
                .write_back("knob_setting", Slot::Arg(3))
                .write_back("output_position", Slot::Local(0)),
        )
        .with(
            Splice::new::<UpgradingInventoryItemEventArgs>(
                Anchor::new(Pattern::StoresLocal(2)).offset(1),
            )
            .prelude(Slot::Arg(3), CURRENT_SETTING)
            .source(Slot::Arg(0))
            .source(Slot::Local(2))
            .source(Slot::Arg(3))
            .source(true)
            .deny(Deny::At(after_item))
            .write_back("knob_setting", Slot::Arg(3)),
        )
        .with(Inject::new(
            after_item,
            vec![Emit::Load(CURRENT_SETTING), Emit::Store(Slot::Arg(3))],
        ))
}

/// Appends `tag` to the server name whenever it is reloaded
fn server_name_tracking(tag: &str) -> PatchDescriptor {
    PatchDescriptor::new("server_name_tracking", RELOAD_SERVER_NAME).with(Postfix::code(vec![
        Emit::Op(OpCode::Call(MethodRef::returning("Server::get_name", 0))),
        Emit::Op(OpCode::Ld(Constant::Str(tag.to_string()))),
        Emit::Op(OpCode::Add),
        Emit::Op(OpCode::Call(MethodRef::void("Server::set_name", 1))),
    ]))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::catalog::{PatchCatalog, PatchState};
    use crate::config::FrameworkConfig;
    use crate::event::player::{
        ActivatingWarheadPanelEventArgs, HurtEventArgs, HurtingEventArgs,
        SpawningRagdollEventArgs, TeleportingEventArgs,
    };
    use crate::event::scp914::{
        KnobSetting, UpgradingInventoryItemEventArgs, UpgradingPlayerEventArgs,
    };
    use crate::event::warhead::ChangingLeverStatusEventArgs;
    use crate::event::{Deniable, EventArgs, EventBus, Handler};
    use crate::host::testing::{self, World};
    use crate::host::{MethodTable, Runtime};
    use crate::il::asm::assemble;
    use crate::il::{Value, Vector3};
    use crate::instrument::TranspileError;
    use crate::patcher::PatchError;

    use super::{
        patches, DAMAGE, PROCESS_PLAYER, RELOAD_SERVER_NAME, SERVER_INTERACT, SPAWN_RAGDOLL,
        TELEPORT, TOGGLE_LEVER,
    };

    /// Host with every built-in patch applied
    struct Fixture {
        methods: Arc<MethodTable>,
        bus: Arc<EventBus>,
        runtime: Runtime,
        catalog: PatchCatalog,
        world: World,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(&FrameworkConfig::default())
        }

        fn with_config(config: &FrameworkConfig) -> Self {
            let methods = testing::methods();
            let bus = Arc::new(EventBus::default());
            let runtime = Runtime::new(methods.clone(), bus.clone());
            let mut catalog = PatchCatalog::new(methods.clone(), patches(config));
            let report = catalog.apply_all();
            assert!(report.is_complete(), "{:?}", report.failed);
            Self {
                methods,
                bus,
                runtime,
                catalog,
                world: World::new(),
            }
        }

        fn call(&mut self, method: &str, args: Vec<Value>) {
            self.runtime.invoke(&mut self.world, method, args).unwrap();
        }
    }

    #[test]
    fn test_teleport_denied() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        fx.bus
            .subscribe(Handler::infallible(|ev: &mut TeleportingEventArgs| ev.deny()));

        fx.call(TELEPORT, vec![player.into(), Vector3::new(3.0, 0.0, 3.0).into()]);
        assert_eq!(fx.world.player(player).position, Vector3::default());
    }

    #[test]
    /// Cancelling lethal damage through the amount keeps the player alive and still raises `Hurt`
    fn test_damage_amount() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        let hurt = Arc::new(Mutex::new(Vec::new()));

        fx.bus
            .subscribe(Handler::infallible(|ev: &mut HurtingEventArgs| ev.set_amount(0.0)));
        let seen = hurt.clone();
        fx.bus.subscribe(Handler::infallible(move |ev: &mut HurtEventArgs| {
            seen.lock().unwrap().push(ev.amount());
        }));

        fx.call(DAMAGE, vec![player.into(), 250.0.into()]);
        assert_eq!(fx.world.player(player).health, 100.0);
        assert_eq!(*hurt.lock().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_damage_denied_raises_no_hurt() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        let hurt = Arc::new(Mutex::new(0));

        fx.bus
            .subscribe(Handler::infallible(|ev: &mut HurtingEventArgs| ev.deny()));
        let count = hurt.clone();
        fx.bus.subscribe(Handler::infallible(move |_: &mut HurtEventArgs| {
            *count.lock().unwrap() += 1;
        }));

        fx.call(DAMAGE, vec![player.into(), 30.0.into()]);
        assert_eq!(fx.world.player(player).health, 100.0);
        assert_eq!(*hurt.lock().unwrap(), 0);
    }

    #[test]
    /// One player with one item raises the player event, then the item event
    fn test_scp914_event_order() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        let item = fx.world.give(player);
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = order.clone();
        fx.bus
            .subscribe(Handler::infallible(move |_: &mut UpgradingPlayerEventArgs| {
                seen.lock().unwrap().push(UpgradingPlayerEventArgs::NAME);
            }));
        let seen = order.clone();
        fx.bus.subscribe(Handler::infallible(
            move |_: &mut UpgradingInventoryItemEventArgs| {
                seen.lock().unwrap().push(UpgradingInventoryItemEventArgs::NAME);
            },
        ));

        fx.call(
            PROCESS_PLAYER,
            vec![
                player.into(),
                true.into(),
                false.into(),
                KnobSetting::Fine.into(),
            ],
        );
        assert_eq!(
            *order.lock().unwrap(),
            vec!["UpgradingPlayer", "UpgradingInventoryItem"]
        );
        assert_eq!(fx.world.upgraded_items, vec![(item, KnobSetting::Fine)]);
        assert_eq!(
            fx.world.player(player).position,
            Vector3::new(0.0, 1.0, -20.0)
        );
    }

    #[test]
    /// A knob change for one item does not carry over to the next item
    fn test_scp914_item_setting_is_scoped() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        let first = fx.world.give(player);
        let second = fx.world.give(player);
        let third = fx.world.give(player);

        fx.bus.subscribe(Handler::infallible(
            move |ev: &mut UpgradingInventoryItemEventArgs| {
                if ev.item() == first {
                    ev.set_knob_setting(KnobSetting::VeryFine);
                }
                if ev.item() == third {
                    ev.deny();
                }
            },
        ));

        fx.call(
            PROCESS_PLAYER,
            vec![
                player.into(),
                true.into(),
                false.into(),
                KnobSetting::Rough.into(),
            ],
        );
        assert_eq!(
            fx.world.upgraded_items,
            vec![(first, KnobSetting::VeryFine), (second, KnobSetting::Rough)]
        );
        assert_eq!(fx.world.upgraded_players, vec![(player, KnobSetting::Rough)]);
    }

    #[test]
    /// Player-level changes reach the machine and the inventory loop
    fn test_scp914_player_changes() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        fx.world.give(player);
        let drop_point = Vector3::new(5.0, 0.0, 5.0);

        fx.bus
            .subscribe(Handler::infallible(move |ev: &mut UpgradingPlayerEventArgs| {
                ev.set_upgrade_items(false);
                ev.set_knob_setting(KnobSetting::Coarse);
                ev.set_output_position(drop_point);
            }));

        fx.call(
            PROCESS_PLAYER,
            vec![
                player.into(),
                true.into(),
                false.into(),
                KnobSetting::Fine.into(),
            ],
        );
        assert_eq!(fx.world.player(player).position, drop_point);
        assert_eq!(fx.world.upgraded_players, vec![(player, KnobSetting::Coarse)]);
        assert!(fx.world.upgraded_items.is_empty());
    }

    #[test]
    fn test_lever() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Technician", 100.0);
        fx.world.player_mut(player).lever_access = true;
        let states = Arc::new(Mutex::new(Vec::new()));

        let seen = states.clone();
        let deny = Handler::infallible(move |ev: &mut ChangingLeverStatusEventArgs| {
            seen.lock().unwrap().push(ev.current_state());
            ev.deny();
        });
        fx.bus.subscribe(deny.clone());
        fx.call(TOGGLE_LEVER, vec![player.into()]);
        assert!(!fx.world.lever);

        fx.bus.unsubscribe(&deny);
        fx.call(TOGGLE_LEVER, vec![player.into()]);
        assert!(fx.world.lever);
        assert_eq!(*states.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_lever_not_raised_without_access() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);
        let raised = Arc::new(Mutex::new(0));

        let count = raised.clone();
        fx.bus.subscribe(Handler::infallible(
            move |_: &mut ChangingLeverStatusEventArgs| {
                *count.lock().unwrap() += 1;
            },
        ));
        fx.call(TOGGLE_LEVER, vec![player.into()]);
        assert_eq!(*raised.lock().unwrap(), 0);
        assert!(!fx.world.lever);
    }

    #[test]
    /// Subscribers can open the panel for a player without a keycard
    fn test_panel_allowed_without_keycard() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Class-D", 100.0);

        fx.call(SERVER_INTERACT, vec![player.into()]);
        assert!(!fx.world.panel_enabled);

        fx.bus.subscribe(Handler::infallible(
            |ev: &mut ActivatingWarheadPanelEventArgs| {
                assert!(!ev.is_allowed());
                ev.set_allowed(true);
            },
        ));
        fx.call(SERVER_INTERACT, vec![player.into()]);
        assert!(fx.world.panel_enabled);
    }

    #[test]
    fn test_ragdoll_changes() {
        let mut fx = Fixture::new();
        let player = fx.world.spawn("Dr. Bright", 0.0);
        let moved = Vector3::new(0.0, -100.0, 0.0);

        fx.bus
            .subscribe(Handler::infallible(move |ev: &mut SpawningRagdollEventArgs| {
                assert_eq!(ev.nickname(), "Dr. Bright");
                assert_eq!(ev.creation_time(), 42.0);
                ev.set_nickname("Unknown");
                ev.set_position(moved);
            }));

        fx.call(SPAWN_RAGDOLL, vec![player.into(), Vector3::default().into()]);
        assert_eq!(fx.world.ragdolls.len(), 1);
        let ragdoll = &fx.world.ragdolls[0];
        assert_eq!(ragdoll.owner, player);
        assert_eq!(ragdoll.nickname, "Unknown");
        assert_eq!(ragdoll.position, moved);
        assert_eq!(ragdoll.creation_time, 42.0);
    }

    #[test]
    fn test_server_name_tracking() {
        let config = FrameworkConfig::default();
        let mut fx = Fixture::with_config(&config);
        fx.call(RELOAD_SERVER_NAME, vec![]);
        assert_eq!(
            fx.world.server_name,
            format!("Site-19{}", config.name_tracking_tag)
        );

        let config = FrameworkConfig {
            is_name_tracking_enabled: false,
            ..FrameworkConfig::default()
        };
        let mut fx = Fixture::with_config(&config);
        assert!(fx.catalog.state("server_name_tracking").is_err());
        fx.call(RELOAD_SERVER_NAME, vec![]);
        assert_eq!(fx.world.server_name, "Site-19");
    }

    #[test]
    /// A method that lost its anchor fails alone and keeps its body
    fn test_missing_anchor() {
        let methods = testing::methods();
        methods.register(
            assemble(
                r#"
                .method AlphaWarheadNukesitePanel::toggle_lever params 1 locals 0 void
                    call Warhead::get_lever 0 ret
                    not
                    call Warhead::set_lever 1 void
                    ret
                "#,
            )
            .unwrap(),
        );
        let before = methods.get(TOGGLE_LEVER).unwrap();

        let mut catalog = PatchCatalog::new(methods.clone(), patches(&FrameworkConfig::default()));
        let report = catalog.apply_all();

        assert_eq!(report.applied.len(), catalog.entries().len() - 1);
        assert_eq!(report.failed.len(), 1);
        let (id, err) = &report.failed[0];
        assert_eq!(*id, "changing_lever_status");
        assert!(matches!(
            err,
            PatchError::Transpile {
                source: TranspileError::AnchorNotFound { .. },
                ..
            }
        ));
        assert!(Arc::ptr_eq(&methods.get(TOGGLE_LEVER).unwrap(), &before));
        assert_eq!(
            catalog.state("changing_lever_status"),
            Ok(PatchState::Unapplied)
        );
    }

    #[test]
    /// Applying twice changes nothing; reverting restores every original body
    fn test_idempotent() {
        let mut fx = Fixture::new();
        let patched = fx.methods.get(TELEPORT).unwrap();

        let report = fx.catalog.apply_all();
        assert!(report.applied.is_empty());
        assert_eq!(report.already_applied.len(), fx.catalog.entries().len());
        assert!(Arc::ptr_eq(&fx.methods.get(TELEPORT).unwrap(), &patched));

        let pristine = testing::methods();
        assert_eq!(fx.catalog.revert_all(), fx.catalog.entries().len());
        assert_eq!(fx.catalog.revert_all(), 0);
        for name in pristine.names() {
            assert_eq!(
                fx.methods.get(&name).unwrap().to_string(),
                pristine.get(&name).unwrap().to_string()
            );
        }
    }
}
