//! Simulation collaborator. The network core never touches game rules
//! directly; everything flows through the [`GameLogic`] trait so the rules
//! module can be swapped out wholesale.

use log::{debug, info};
use shared::usercmd::UserCmd;
use shared::PlayerState;

/// Calls the network core makes into the simulation. Slot indices are
/// stable for the lifetime of a connection.
pub trait GameLogic: Send {
    /// A client wants in. `first_time` is false for the re-connect pass
    /// after a map restart. Returning `Some(reason)` refuses the client.
    fn client_connect(&mut self, slot: usize, first_time: bool, is_bot: bool) -> Option<String>;

    /// Client finished loading and entered the world.
    fn client_begin(&mut self, slot: usize);

    /// Userinfo changed; pull whatever the rules care about.
    fn client_userinfo_changed(&mut self, slot: usize, userinfo: &str);

    /// Client left. Always paired with an earlier `client_connect`.
    fn client_disconnect(&mut self, slot: usize);

    /// A reliable command the server core did not recognize.
    fn client_command(&mut self, slot: usize, args: &[String]);

    /// One accepted movement command.
    fn client_think(&mut self, slot: usize, cmd: &UserCmd);

    /// Advance the simulation to `time`.
    fn run_frame(&mut self, time: i32);

    /// Direct access to a slot's authoritative player state.
    fn player_state(&mut self, slot: usize) -> &mut PlayerState;

    /// Trailing binary payload of a client message.
    fn binary_message(&mut self, _slot: usize, _data: &[u8], _time: i32) {}
}

const BASELINE_SPEED: f32 = 127.0;

/// Minimal built-in rules: players accelerate along their view axes and
/// coast between frames. Enough to exercise the whole connection pipeline.
pub struct BaselineGame {
    states: Vec<PlayerState>,
    connected: Vec<bool>,
    last_frame_time: i32,
}

impl BaselineGame {
    pub fn new(max_clients: usize) -> Self {
        BaselineGame {
            states: vec![PlayerState::default(); max_clients],
            connected: vec![false; max_clients],
            last_frame_time: 0,
        }
    }
}

impl GameLogic for BaselineGame {
    fn client_connect(&mut self, slot: usize, first_time: bool, is_bot: bool) -> Option<String> {
        debug!(
            "game: connect slot {} (first_time: {}, bot: {})",
            slot, first_time, is_bot
        );
        if first_time {
            self.states[slot] = PlayerState {
                health: 100,
                ..PlayerState::default()
            };
        }
        self.connected[slot] = true;
        None
    }

    fn client_begin(&mut self, slot: usize) {
        info!("game: slot {} entered the world", slot);
        let ps = &mut self.states[slot];
        ps.velocity = [0.0; 3];
        ps.pm_flags = 0;
        ps.pm_time = 0;
    }

    fn client_userinfo_changed(&mut self, _slot: usize, _userinfo: &str) {}

    fn client_disconnect(&mut self, slot: usize) {
        debug!("game: disconnect slot {}", slot);
        self.connected[slot] = false;
        self.states[slot] = PlayerState::default();
    }

    fn client_command(&mut self, slot: usize, args: &[String]) {
        debug!("game: slot {} command {:?}", slot, args);
    }

    fn client_think(&mut self, slot: usize, cmd: &UserCmd) {
        let ps = &mut self.states[slot];
        for i in 0..3 {
            ps.viewangles[i] = (cmd.angles[i].wrapping_add(ps.delta_angles[i]) as f32)
                * (360.0 / 65536.0);
        }
        ps.velocity[0] = cmd.forwardmove as f32 / BASELINE_SPEED;
        ps.velocity[1] = cmd.rightmove as f32 / BASELINE_SPEED;
        ps.velocity[2] = cmd.upmove as f32 / BASELINE_SPEED;
        if ps.has_weapon(cmd.weapon) {
            ps.weapon = cmd.weapon;
        }
    }

    fn run_frame(&mut self, time: i32) {
        let dt = (time - self.last_frame_time).max(0) as f32 / 1000.0;
        self.last_frame_time = time;
        for (i, ps) in self.states.iter_mut().enumerate() {
            if !self.connected[i] {
                continue;
            }
            for axis in 0..3 {
                ps.origin[axis] += ps.velocity[axis] * dt;
            }
            if ps.pm_time > 0 {
                ps.pm_time = (ps.pm_time - (dt * 1000.0) as i32).max(0);
            }
        }
    }

    fn player_state(&mut self, slot: usize) -> &mut PlayerState {
        &mut self.states[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn connect_then_begin_resets_motion() {
        let mut game = BaselineGame::new(4);
        assert!(game.client_connect(0, true, false).is_none());
        game.player_state(0).velocity = [5.0, 0.0, 0.0];
        game.client_begin(0);
        assert_approx_eq!(game.player_state(0).velocity[0], 0.0);
        assert_eq!(game.player_state(0).health, 100);
    }

    #[test]
    fn think_applies_movement_axes() {
        let mut game = BaselineGame::new(4);
        game.client_connect(1, true, false);
        game.client_begin(1);

        let cmd = UserCmd {
            server_time: 100,
            forwardmove: 127,
            ..UserCmd::default()
        };
        game.client_think(1, &cmd);
        assert_approx_eq!(game.player_state(1).velocity[0], 1.0);

        game.run_frame(1000);
        game.run_frame(2000);
        assert_approx_eq!(game.player_state(1).origin[0], 1.0);
    }

    #[test]
    fn disconnected_slots_do_not_advance() {
        let mut game = BaselineGame::new(2);
        game.client_connect(0, true, false);
        game.player_state(0).velocity = [1.0, 0.0, 0.0];
        game.client_disconnect(0);
        game.run_frame(1000);
        assert_approx_eq!(game.player_state(0).origin[0], 0.0);
    }

    #[test]
    fn weapon_switch_requires_ownership() {
        let mut game = BaselineGame::new(1);
        game.client_connect(0, true, false);
        let ps = game.player_state(0);
        ps.give_weapon(3);
        ps.weapon = 3;

        let cmd = UserCmd {
            server_time: 50,
            weapon: 7,
            ..UserCmd::default()
        };
        game.client_think(0, &cmd);
        assert_eq!(game.player_state(0).weapon, 3);

        game.player_state(0).give_weapon(7);
        game.client_think(0, &cmd);
        assert_eq!(game.player_state(0).weapon, 7);
    }
}
