//! Operator console. Commands arrive over stdin or rcon as plain text;
//! every command returns its printable output so both paths share the
//! same handlers. Script-facing accessors publish results through the
//! "returnvalue" variable instead.

use std::fs;
use std::net::SocketAddr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{transition_phase, GamePhase};
use crate::network::Server;
use crate::session::{strip_color_codes, ClientState};
use shared::{angle_to_short, PlayerState, CS_WARMUP};

/// On-disk snapshot of a running game, bincode-encoded.
#[derive(Debug, Serialize, Deserialize)]
pub struct Savegame {
    pub version: u32,
    pub mapname: String,
    pub time: i32,
    pub players: Vec<(usize, PlayerState)>,
}

pub const SAVEGAME_VERSION: u32 = 1;

impl Server {
    /// Executes one console line and returns whatever it printed.
    pub fn console_command(&mut self, line: &str) -> String {
        let args = crate::commands::tokenize(line);
        let name = match args.first() {
            Some(n) => n.to_ascii_lowercase(),
            None => return String::new(),
        };
        let args = &args[1..];

        match name.as_str() {
            "map" => self.cmd_map(args, false),
            "devmap" => self.cmd_map(args, true),
            "spmap" => self.cmd_map(args, false),
            "spdevmap" => self.cmd_map(args, true),
            "map_restart" => self.map_restart(args),
            "loadgame" => self.cmd_loadgame(args),
            "savegame" => self.cmd_savegame(args),
            "killserver" => self.cmd_killserver(),
            "quit" => {
                self.running = false;
                "shutting down\n".to_string()
            }
            "status" => self.cmd_status(),
            "serverinfo" => format!("{}\n", self.build_serverinfo()),
            "systeminfo" => format!("{}\n", self.build_systeminfo()),
            "dumpuser" => self.cmd_dumpuser(args),
            "rcon" => self.cmd_rcon_forward(args),
            "heartbeat" => {
                self.heartbeat();
                String::new()
            }
            "say" => self.cmd_say(args),
            "sendservercommand" => self.cmd_send_server_command(args),
            "kick" => self.cmd_kick(args),
            "tempbanclient" => self.cmd_tempban_client(args),
            "tempbanuser" => self.cmd_tempban_user(args),
            "gamestate" => self.cmd_gamestate(args),
            "setleveltime" => self.cmd_setleveltime(args),
            "svstime" => format!("{}\n", self.time),
            "getclstate" => self.cmd_getclstate(args),
            "putspec" => self.cmd_putspec(args),
            "setfindmaptime" => self.cmd_setfindmaptime(args),

            // script accessors; results land in "returnvalue"
            "getvelocity" => self.with_state(args, |ps, _, vars| {
                vars.return_value = format!(
                    "{} {} {}",
                    ps.velocity[0], ps.velocity[1], ps.velocity[2]
                );
            }),
            "setvelocity" => self.with_state(args, |ps, rest, _| {
                for (i, v) in rest.iter().take(3).enumerate() {
                    ps.velocity[i] = v.parse().unwrap_or(0.0);
                }
            }),
            "clearvelocity" => self.with_state(args, |ps, _, _| {
                ps.velocity = [0.0; 3];
            }),
            "getviewangles" => self.with_state(args, |ps, _, vars| {
                vars.return_value = format!(
                    "{} {} {}",
                    ps.viewangles[0], ps.viewangles[1], ps.viewangles[2]
                );
            }),
            "setviewangles" => self.cmd_setviewangles(args),
            "getpmflagsandtime" => self.with_state(args, |ps, _, vars| {
                vars.return_value = format!("{} {}", ps.pm_flags, ps.pm_time);
            }),
            "setpmflagsandtime" => self.with_state(args, |ps, rest, _| {
                ps.pm_flags = rest.first().and_then(|v| v.parse().ok()).unwrap_or(0);
                ps.pm_time = rest.get(1).and_then(|v| v.parse().ok()).unwrap_or(0);
            }),
            "getclientname" => self.cmd_getclientname(args),
            "setclientname" => self.cmd_setclientname(args),
            "weaponcheck" => self.with_state(args, |ps, rest, vars| {
                let weapon = rest.first().and_then(|v| v.parse().ok()).unwrap_or(0u8);
                vars.return_value = (ps.has_weapon(weapon) as i32).to_string();
            }),
            "weaponset" => self.with_state(args, |ps, rest, _| {
                if let Some(weapon) = rest.first().and_then(|v| v.parse().ok()) {
                    ps.give_weapon(weapon);
                    ps.weapon = weapon;
                }
            }),
            "weaponremove" => self.with_state(args, |ps, rest, _| {
                if let Some(weapon) = rest.first().and_then(|v| v.parse().ok()) {
                    ps.take_weapon(weapon);
                    if ps.weapon == weapon {
                        ps.weapon = 0;
                    }
                }
            }),
            "weaponchange" => self.with_state(args, |ps, rest, _| {
                if let Some(weapon) = rest.first().and_then(|v| v.parse().ok()) {
                    if ps.has_weapon(weapon) {
                        ps.weapon = weapon;
                    }
                }
            }),
            "weaponleave" => self.with_state(args, |ps, _, _| {
                // keep only what's in hand
                let current = ps.weapon;
                ps.weapons = [0; 2];
                ps.give_weapon(current);
            }),
            "getweaponstate" => self.with_state(args, |ps, _, vars| {
                vars.return_value = ps.weapon_state.to_string();
            }),
            "setweaponstate" => self.with_state(args, |ps, rest, _| {
                ps.weapon_state = rest.first().and_then(|v| v.parse().ok()).unwrap_or(0);
            }),
            "getclassweapontime" => self.with_state(args, |ps, _, vars| {
                vars.return_value = ps.class_weapon_time.to_string();
            }),
            "setclassweapontime" => self.with_state(args, |ps, rest, _| {
                ps.class_weapon_time = rest.first().and_then(|v| v.parse().ok()).unwrap_or(0);
            }),
            "removevoteflag" => self.with_state(args, |ps, _, _| {
                ps.voted = false;
            }),
            "removevoteflags" => {
                for slot in 0..self.clients.len() {
                    if self.clients[slot].is_connected() {
                        self.game.player_state(slot).voted = false;
                    }
                }
                String::new()
            }
            "setstatkey" => self.with_state(args, |ps, rest, _| {
                if let Some(bit) = rest.first().and_then(|v| v.parse::<u32>().ok()) {
                    if bit < 32 {
                        ps.stat_keys |= 1 << bit;
                    }
                }
            }),
            "clearstatkey" => self.with_state(args, |ps, rest, _| {
                if let Some(bit) = rest.first().and_then(|v| v.parse::<u32>().ok()) {
                    if bit < 32 {
                        ps.stat_keys &= !(1 << bit);
                    }
                }
            }),
            "getlastactivitytime" => self.cmd_getlastactivitytime(args),

            _ => format!("Unknown command \"{}\"\n", name),
        }
    }

    /// Resolves a client by slot number or (color-stripped) name.
    pub(crate) fn find_client(&self, token: &str) -> Option<usize> {
        if token.chars().all(|c| c.is_ascii_digit()) {
            let slot: usize = token.parse().ok()?;
            if slot < self.clients.len() && self.clients[slot].is_connected() {
                return Some(slot);
            }
            return None;
        }
        let wanted = strip_color_codes(token).to_ascii_lowercase();
        self.clients.iter().position(|cl| {
            cl.is_connected()
                && strip_color_codes(&cl.name).to_ascii_lowercase() == wanted
        })
    }

    /// Shared plumbing for accessors that touch one client's player state.
    fn with_state(
        &mut self,
        args: &[String],
        f: impl FnOnce(&mut PlayerState, &[String], &mut crate::config::ServerVars),
    ) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };
        let state = self.game.player_state(slot);
        f(state, &args[1..], &mut self.vars);
        String::new()
    }

    fn cmd_map(&mut self, args: &[String], cheats: bool) -> String {
        let mapname = match args.first() {
            Some(m) => m.clone(),
            None => return "Usage: map <mapname>\n".to_string(),
        };

        let path = self.config.fs_base.join("maps").join(format!("{}.bsp", mapname));
        if !path.exists() {
            return format!("Can't find map {}\n", path.display());
        }

        self.vars.cheats = cheats;
        self.vars.savegame_loading = false;
        self.vars.savegame_filename.clear();
        self.spawn_server(&mapname);
        String::new()
    }

    /// Restarts the current map without reloading it. With a delay the
    /// restart is announced through the warmup configstring first.
    pub(crate) fn map_restart(&mut self, args: &[String]) -> String {
        if self.mapname.is_empty() {
            return "No map loaded\n".to_string();
        }
        // never restart twice in one frame
        if self.time == self.server_id {
            return String::new();
        }

        let delay: i32 = args
            .first()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0);
        if delay > 0 && self.restart_time == 0 {
            self.restart_time = self.time + delay * 1000;
            self.set_configstring(CS_WARMUP, &self.restart_time.to_string());
            return String::new();
        }

        if let Some(requested) = args.get(1).and_then(|p| p.parse().ok()) {
            let requested = match GamePhase::from_i32(requested) {
                Some(p) => p,
                None => return "Invalid gamestate\n".to_string(),
            };
            match transition_phase(self.vars.phase, requested) {
                Some(new_phase) => self.vars.phase = new_phase,
                None => {
                    return format!(
                        "Invalid gamestate transition: {} -> {}\n",
                        self.vars.phase.as_i32(),
                        requested.as_i32()
                    );
                }
            }
        }

        info!("map_restart: {}", self.mapname);

        // a restart changes the server id, but not the restart marker;
        // packets stamped in between are recognizably pre-restart
        self.server_id = self.time;
        self.vars.restarting = true;
        self.rebuild_info_configstrings();

        self.game.run_frame(self.time);
        self.vars.restarting = false;

        if self.vars.savegame_loading {
            self.vars.savegame_loading = false;
        }

        // run every connected client through a lightweight reconnect
        for i in 0..self.clients.len() {
            if self.clients[i].state < ClientState::Connected {
                continue;
            }
            self.send_server_command(i, "map_restart\n");
            if self.clients[i].state < ClientState::Connected {
                continue; // the overflow path just dropped them
            }

            let is_bot = self.clients[i].is_bot;
            if let Some(denied) = self.game.client_connect(i, false, is_bot) {
                self.drop_client(i, &denied);
                continue;
            }

            let cmd = self.clients[i].last_usercmd;
            self.client_enter_world(i, cmd);
        }

        String::new()
    }

    fn cmd_savegame(&mut self, args: &[String]) -> String {
        if !self.config.allow_save {
            return "Saving is disabled\n".to_string();
        }
        let name = match args.first() {
            Some(n) => n.clone(),
            None => return "Usage: savegame <name>\n".to_string(),
        };
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return "Bad savegame name\n".to_string();
        }

        let mut players = Vec::new();
        for slot in 0..self.clients.len() {
            if self.clients[slot].state == ClientState::Active {
                players.push((slot, self.game.player_state(slot).clone()));
            }
        }

        let save = Savegame {
            version: SAVEGAME_VERSION,
            mapname: self.mapname.clone(),
            time: self.time,
            players,
        };

        let dir = self.config.fs_base.join("save");
        let path = dir.join(format!("{}.sav", name));
        let encoded = match bincode::serialize(&save) {
            Ok(e) => e,
            Err(e) => return format!("Couldn't encode savegame: {}\n", e),
        };
        if let Err(e) = fs::create_dir_all(&dir).and_then(|_| fs::write(&path, encoded)) {
            return format!("Couldn't write {}: {}\n", path.display(), e);
        }
        format!("Saved to {}\n", path.display())
    }

    fn cmd_loadgame(&mut self, args: &[String]) -> String {
        let name = match args.first() {
            Some(n) => n.clone(),
            None => return "Usage: loadgame <name>\n".to_string(),
        };
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return "Bad savegame name\n".to_string();
        }

        let path = self.config.fs_base.join("save").join(format!("{}.sav", name));
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) => return format!("Couldn't read {}: {}\n", path.display(), e),
        };
        let save: Savegame = match bincode::deserialize(&data) {
            Ok(s) => s,
            Err(e) => return format!("Corrupt savegame {}: {}\n", path.display(), e),
        };
        if save.version != SAVEGAME_VERSION {
            return format!("Savegame version {} not supported\n", save.version);
        }

        self.vars.savegame_loading = true;
        self.vars.savegame_filename = name;
        let mapname = save.mapname.clone();
        self.spawn_server(&mapname);

        self.time = save.time;
        for (slot, state) in save.players {
            if slot < self.clients.len() {
                *self.game.player_state(slot) = state;
            }
        }
        self.vars.savegame_loading = false;
        format!("Loaded {}\n", path.display())
    }

    /// Forwards a command to another server's remote console, signed
    /// with this server's rcon password.
    fn cmd_rcon_forward(&mut self, args: &[String]) -> String {
        let addr = match args.first().and_then(|a| a.parse::<SocketAddr>().ok()) {
            Some(a) => a,
            None => return "Usage: rcon <address> <command>\n".to_string(),
        };
        let command = args[1..].join(" ");
        if command.is_empty() {
            return "Usage: rcon <address> <command>\n".to_string();
        }
        if self.config.rcon_password.is_empty() {
            return "rcon_password is not set\n".to_string();
        }
        self.send_oob(addr, &format!("rcon {} {}", self.config.rcon_password, command));
        String::new()
    }

    fn cmd_killserver(&mut self) -> String {
        for i in 0..self.clients.len() {
            if self.clients[i].is_connected() {
                self.drop_client(i, "server shut down");
            }
        }
        self.mapname.clear();
        self.heartbeat();
        "Server killed\n".to_string()
    }

    fn cmd_status(&mut self) -> String {
        let mut out = format!("map: {}\n", self.mapname);
        out.push_str(
            "num score ping name            lastmsg address               qport rate\n",
        );
        out.push_str(
            "--- ----- ---- --------------- ------- --------------------- ----- -----\n",
        );

        for i in 0..self.clients.len() {
            if self.clients[i].state == ClientState::Free {
                continue;
            }
            let score = self.game.player_state(i).score;
            let cl = &self.clients[i];
            let ping = match cl.state {
                ClientState::Connected => "CNCT".to_string(),
                ClientState::Zombie => "ZMBI".to_string(),
                _ => cl.ping.to_string(),
            };
            let addr = cl
                .addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "bot".to_string());
            out.push_str(&format!(
                "{:3} {:5} {:>4} {:<15} {:7} {:<21} {:5} {:5}\n",
                i,
                score,
                ping,
                cl.name,
                self.time - cl.last_packet_time,
                addr,
                cl.qport,
                cl.rate
            ));
        }
        out
    }

    fn cmd_dumpuser(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };

        let mut out = String::from("userinfo\n--------\n");
        let info = &self.clients[slot].userinfo;
        let mut parts = info.split('\\');
        if info.starts_with('\\') {
            parts.next();
        }
        loop {
            match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => {
                    out.push_str(&format!("{:<20}{}\n", key, value));
                }
                _ => break,
            }
        }
        out
    }

    fn cmd_say(&mut self, args: &[String]) -> String {
        let text = args.join(" ");
        self.broadcast_server_command(&format!("chat \"console: {}\"", text));
        String::new()
    }

    fn cmd_send_server_command(&mut self, args: &[String]) -> String {
        let target = match args.first() {
            Some(t) => t.clone(),
            None => return "Usage: sendservercommand <client|-1> <command>\n".to_string(),
        };
        let command = args[1..].join(" ");
        if command.is_empty() {
            return "Nothing to send\n".to_string();
        }

        if target == "-1" {
            self.broadcast_server_command(&command);
            return String::new();
        }
        match self.find_client(&target) {
            Some(slot) => {
                self.send_server_command(slot, &command);
                String::new()
            }
            None => "Client not found\n".to_string(),
        }
    }

    fn cmd_kick(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };
        if self.clients[slot].is_local {
            return "Cannot kick host player\n".to_string();
        }
        let reason = if args.len() > 1 {
            args[1..].join(" ")
        } else {
            "was kicked".to_string()
        };
        self.drop_client(slot, &reason);
        String::new()
    }

    fn tempban(&mut self, slot: usize, length_secs: i32) -> String {
        if self.clients[slot].is_local {
            return "Cannot ban host player\n".to_string();
        }
        let ip = match self.clients[slot].addr {
            Some(a) => a.ip(),
            None => return "Client has no address\n".to_string(),
        };
        self.tempbans.ban(ip, length_secs, self.time);
        let message = self.config.tempban_message.clone();
        self.drop_client(slot, &message);
        String::new()
    }

    fn cmd_tempban_client(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| t.parse::<usize>().ok()) {
            Some(s) if s < self.clients.len() && self.clients[s].is_connected() => s,
            _ => return "Bad client slot\n".to_string(),
        };
        let length = args.get(1).and_then(|l| l.parse().ok()).unwrap_or(60);
        self.tempban(slot, length)
    }

    fn cmd_tempban_user(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };
        let length = args.get(1).and_then(|l| l.parse().ok()).unwrap_or(60);
        self.tempban(slot, length)
    }

    /// Forces the match phase through the usual transition rules.
    fn cmd_gamestate(&mut self, args: &[String]) -> String {
        let requested = match args.first().and_then(|v| v.parse().ok()).and_then(GamePhase::from_i32) {
            Some(p) => p,
            None => return format!("gamestate is {}\n", self.vars.phase.as_i32()),
        };
        match transition_phase(self.vars.phase, requested) {
            Some(new_phase) => {
                self.vars.phase = new_phase;
                self.rebuild_info_configstrings();
                String::new()
            }
            None => format!(
                "Invalid gamestate transition: {} -> {}\n",
                self.vars.phase.as_i32(),
                requested.as_i32()
            ),
        }
    }

    fn cmd_setleveltime(&mut self, args: &[String]) -> String {
        match args.first().and_then(|v| v.parse().ok()) {
            Some(t) => {
                self.time = t;
                String::new()
            }
            None => "Usage: setleveltime <msec>\n".to_string(),
        }
    }

    fn cmd_getclstate(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => {
                self.vars.return_value = "-1".to_string();
                return String::new();
            }
        };
        self.vars.return_value = (self.clients[slot].state as i32).to_string();
        String::new()
    }

    fn cmd_putspec(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };
        self.game
            .client_command(slot, &["team".to_string(), "s".to_string()]);
        String::new()
    }

    fn cmd_setfindmaptime(&mut self, args: &[String]) -> String {
        let delay: i32 = match args.first().and_then(|v| v.parse().ok()) {
            Some(d) => d,
            None => return "Usage: setfindmaptime <msec>\n".to_string(),
        };
        for cl in &mut self.clients {
            cl.next_findmap_time = self.time + delay;
        }
        String::new()
    }

    fn cmd_getclientname(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };
        self.vars.return_value = self.clients[slot].name.clone();
        String::new()
    }

    fn cmd_setclientname(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };
        let name = match args.get(1) {
            Some(n) => n.clone(),
            None => return "Usage: setclientname <client> <name>\n".to_string(),
        };
        if let Some(updated) =
            shared::info::set_value_for_key(&self.clients[slot].userinfo, "name", &name)
        {
            self.clients[slot].userinfo = updated;
        }
        self.userinfo_changed(slot);
        let userinfo = self.clients[slot].userinfo.clone();
        self.game.client_userinfo_changed(slot, &userinfo);
        String::new()
    }

    fn cmd_setviewangles(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => return "Client not found\n".to_string(),
        };

        let mut angles = [0.0f32; 3];
        for (i, v) in args[1..].iter().take(3).enumerate() {
            angles[i] = v.parse().unwrap_or(0.0);
        }

        // the client applies its own command angles on top, so the
        // deltas have to absorb them for the view to land where asked
        let last = self.clients[slot].last_usercmd;
        let ps = self.game.player_state(slot);
        ps.viewangles = angles;
        for i in 0..3 {
            ps.delta_angles[i] = angle_to_short(angles[i]).wrapping_sub(last.angles[i]);
        }
        String::new()
    }

    fn cmd_getlastactivitytime(&mut self, args: &[String]) -> String {
        let slot = match args.first().and_then(|t| self.find_client(t)) {
            Some(s) => s,
            None => {
                warn!("getlastactivitytime: client not found");
                self.vars.return_value = "0".to_string();
                return String::new();
            }
        };
        self.vars.return_value = self.clients[slot].last_activity_time.to_string();
        String::new()
    }
}
