//! In-session packet parsing: reliable client commands, movement
//! command batches and optional binary payloads.

use log::{debug, info, warn};

use crate::config::GamePhase;
use crate::network::Server;
use crate::session::ClientState;
use shared::msg::MsgReader;
use shared::usercmd::{command_hash, UserCmd};
use shared::{ClientOp, MAX_BINARY_MESSAGE, MAX_PACKET_USERCMDS, MAX_RELIABLE_COMMANDS};

/// Commands exempt from flood protection. Gameplay stalls if these get
/// throttled while a client is spawning or switching teams.
const FLOOD_EXEMPT: [&str; 4] = ["team", "setspawnpt", "score", "forcetapout"];

impl Server {
    /// Parses one routed in-session packet. The qport has already been
    /// consumed from `r`.
    pub(crate) fn execute_client_message(&mut self, slot: usize, r: &mut MsgReader) {
        let (server_id, message_acknowledge, reliable_acknowledge) =
            match (r.read_i32(), r.read_i32(), r.read_i32()) {
                (Ok(a), Ok(b), Ok(c)) => (a, b, c),
                _ => return,
            };

        if message_acknowledge < 0 || reliable_acknowledge < 0 {
            // usually a fabricated packet; never trust it
            self.drop_client(slot, "illegible client message");
            return;
        }

        {
            let cl = &mut self.clients[slot];
            cl.message_acknowledge = message_acknowledge;

            if reliable_acknowledge
                < cl.reliable_sequence - MAX_RELIABLE_COMMANDS as i32
            {
                // usually only fabricated packets acknowledge this far
                // back; resynchronize and ignore the message
                cl.reliable_acknowledge = cl.reliable_sequence;
                return;
            }
            cl.reliable_acknowledge = reliable_acknowledge;
        }

        // a message from before the last map change is only honored in
        // full for clients mid-download; everyone else gets, at most,
        // their reliable commands read
        let downloading = !self.clients[slot].download_name.is_empty()
            || self.clients[slot]
                .last_client_command_string
                .contains("nextdl");

        if server_id != self.server_id && !downloading {
            if server_id >= self.restarted_server_id && server_id < self.server_id {
                // they just haven't caught the map_restart yet
                debug!(
                    "{}: ignoring pre map_restart / outdated client message",
                    self.clients[slot].name
                );
                return;
            }

            if self.clients[slot].message_acknowledge
                > self.clients[slot].gamestate_message_num
            {
                debug!("{}: dropped gamestate, resending", self.clients[slot].name);
                self.send_client_gamestate(slot);
            }

            // read the client commands so their acks stay in step, but
            // only map-change-safe ones may execute
            self.parse_commands_and_moves(slot, r, true);
            return;
        }

        self.parse_commands_and_moves(slot, r, false);
    }

    /// The command/move loop, shared by the live path and the stale
    /// server-id path. With `commands_only`, movement is discarded.
    fn parse_commands_and_moves(&mut self, slot: usize, r: &mut MsgReader, commands_only: bool) {
        let mut moved = false;

        loop {
            let tag = match r.read_u8() {
                Ok(t) => t,
                Err(_) => break,
            };

            match ClientOp::from_u8(tag) {
                Some(ClientOp::ClientCommand) => {
                    if !self.parse_client_command(slot, r, commands_only) {
                        return; // drop or throttle ends the packet
                    }
                }
                Some(ClientOp::Move) | Some(ClientOp::MoveNoDelta) if commands_only || moved => {
                    // stale packets only matter for their client commands,
                    // and only one move batch per packet is honored
                    return;
                }
                Some(ClientOp::Move) => {
                    self.parse_user_move(slot, r, true);
                    moved = true;
                }
                Some(ClientOp::MoveNoDelta) => {
                    self.parse_user_move(slot, r, false);
                    moved = true;
                }
                Some(ClientOp::Eof) => {
                    self.parse_binary_message(slot, r);
                    return;
                }
                None => {
                    warn!(
                        "bad command byte {} from {}",
                        tag, self.clients[slot].name
                    );
                    return;
                }
            }
        }

        debug!("missing EOF from {}", self.clients[slot].name);
    }

    fn move_decode_key(&self, slot: usize) -> u32 {
        let cl = &self.clients[slot];
        let hash = command_hash(cl.reliable_command(cl.reliable_acknowledge));
        (self.checksum_feed ^ cl.message_acknowledge) as u32 ^ hash
    }

    /// One reliable client command. Returns false when parsing of this
    /// packet must stop (sequence error, drop, or flood throttle). With
    /// `premaprestart`, only commands safe across a map change execute.
    fn parse_client_command(&mut self, slot: usize, r: &mut MsgReader, premaprestart: bool) -> bool {
        let sequence = match r.read_i32() {
            Ok(s) => s,
            Err(_) => return false,
        };
        let text = match r.read_string() {
            Ok(t) => t,
            Err(_) => return false,
        };

        // already executed; the client is just retransmitting
        if sequence <= self.clients[slot].last_client_command {
            return true;
        }

        debug!(
            "clientCommand: {} : {} : {}",
            self.clients[slot].name, sequence, text
        );

        if sequence > self.clients[slot].last_client_command + 1 {
            info!("Client {} lost {} clientCommands", self.clients[slot].name,
                sequence - self.clients[slot].last_client_command + 1);
            self.drop_client(slot, "Lost reliable commands");
            return false;
        }

        let args = crate::commands::tokenize(&text);
        let cmd = args
            .first()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_default();

        // malicious users may spam commands to lag other players; keep
        // them to roughly one per 800ms once in the world
        let mut client_ok = true;
        if self.config.flood_protect
            && self.clients[slot].state >= ClientState::Active
            && !FLOOD_EXEMPT.contains(&cmd.as_str())
        {
            if self.time < self.clients[slot].next_reliable_time {
                client_ok = false;
            } else {
                self.clients[slot].next_reliable_time = self.time + 800;
            }
        }

        // team changes and intermission chatter count as activity
        if cmd == "team" || self.vars.phase == GamePhase::Intermission {
            self.clients[slot].last_activity_time = self.time;
        }

        self.clients[slot].last_client_command = sequence;
        self.clients[slot].last_client_command_string = text.clone();

        if !client_ok {
            // a throttled command invalidates the rest of the packet
            return false;
        }

        self.dispatch_client_command(slot, &args, premaprestart);
        self.clients[slot].state != ClientState::Zombie
    }

    /// A batch of movement commands, delta-coded against the previous one.
    fn parse_user_move(&mut self, slot: usize, r: &mut MsgReader, delta: bool) {
        if delta {
            self.clients[slot].delta_message = self.clients[slot].message_acknowledge;
        } else {
            self.clients[slot].delta_message = -1;
        }

        let count = match r.read_u8() {
            Ok(c) => c as usize,
            Err(_) => return,
        };
        if count == 0 || count > MAX_PACKET_USERCMDS {
            warn!("cmdCount {} out of range from {}", count, self.clients[slot].name);
            return;
        }

        let key = self.move_decode_key(slot);
        let mut cmds = Vec::with_capacity(count);
        let mut from = self.clients[slot].last_usercmd;
        for _ in 0..count {
            match UserCmd::read_delta(r, &from, key) {
                Ok(cmd) => {
                    cmds.push(cmd);
                    from = cmd;
                }
                Err(e) => {
                    debug!("corrupt move batch from {}: {}", self.clients[slot].name, e);
                    return;
                }
            }
        }

        // the pure report can race the first move after a gamestate;
        // don't assume anything until it arrives
        if self.config.pure_mode != crate::config::PureMode::Off
            && !self.clients[slot].pure_authentic
            && !self.clients[slot].got_cp
        {
            if self.clients[slot].state == ClientState::Active {
                debug!(
                    "{}: didn't get cp command, resending gamestate",
                    self.clients[slot].name
                );
                self.send_client_gamestate(slot);
            }
            return;
        }

        if self.clients[slot].state == ClientState::Primed {
            self.client_enter_world(slot, cmds[0]);
            // now in the world; the commands still run below
        }

        if self.config.pure_mode == crate::config::PureMode::Strict
            && !self.clients[slot].pure_authentic
        {
            self.drop_client(slot, "Cannot validate pure client!");
            return;
        }

        if self.clients[slot].state != ClientState::Active {
            self.clients[slot].delta_message = -1;
            return;
        }

        let batch_end = cmds[count - 1].server_time;
        for cmd in cmds {
            // stale or reordered commands never run
            if cmd.server_time > batch_end {
                continue;
            }
            if cmd.server_time <= self.clients[slot].last_usercmd.server_time {
                continue;
            }
            self.client_think(slot, cmd);
        }
    }

    /// Runs one movement command through the simulation and stamps
    /// activity for inputs that changed.
    pub(crate) fn client_think(&mut self, slot: usize, cmd: UserCmd) {
        {
            let cl = &mut self.clients[slot];
            let prev = cl.last_usercmd;
            let times = &mut cl.last_usercmd_times;

            for bit in 0..8 {
                if cmd.buttons & (1 << bit) != 0 && prev.buttons & (1 << bit) == 0 {
                    times.buttons[bit] = self.time;
                    cl.last_activity_time = self.time;
                }
                if cmd.wbuttons & (1 << bit) != 0 && prev.wbuttons & (1 << bit) == 0 {
                    times.wbuttons[bit] = self.time;
                    cl.last_activity_time = self.time;
                }
            }
            if cmd.forwardmove != 0 && prev.forwardmove != cmd.forwardmove {
                times.forwardmove = self.time;
                cl.last_activity_time = self.time;
            }
            if cmd.rightmove != 0 && prev.rightmove != cmd.rightmove {
                times.rightmove = self.time;
                cl.last_activity_time = self.time;
            }
            if cmd.upmove != 0 && prev.upmove != cmd.upmove {
                times.upmove = self.time;
                cl.last_activity_time = self.time;
            }

            cl.last_usercmd = cmd;

            if cl.state != ClientState::Active {
                return; // may have been kicked during the batch
            }
        }

        self.game.client_think(slot, &cmd);
    }

    /// An opaque payload after EOF is handed straight to the simulation.
    fn parse_binary_message(&mut self, slot: usize, r: &mut MsgReader) {
        let rest = r.read_rest();
        if rest.is_empty() {
            return;
        }
        if rest.len() > MAX_BINARY_MESSAGE {
            debug!(
                "oversized binary message ({} bytes) from {}",
                rest.len(),
                self.clients[slot].name
            );
            return;
        }
        let time = self.clients[slot].last_usercmd.server_time;
        self.game.binary_message(slot, rest, time);
    }
}
