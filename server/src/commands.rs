//! Reliable client command handlers: userinfo updates, the download
//! conversation, pure validation reports and the map catalog queries.

use log::{debug, info, warn};

use crate::config::PureMode;
use crate::download::{self, AckResult};
use crate::network::Server;
use crate::pure::{self, PureVerdict};
use crate::session::{ClientState, DLNOTIFY_ALL};

/// Splits a command line into arguments. Double quotes group words and
/// are stripped from the result.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                if in_quotes {
                    args.push(std::mem::take(&mut current));
                    in_quotes = false;
                } else {
                    in_quotes = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || in_quotes {
        args.push(current);
    }
    args
}

type CommandHandler = fn(&mut Server, usize, &[String]);

/// Server-level client commands. The bool marks commands that still
/// execute while the client's view of the map is out of date.
const CLIENT_COMMANDS: &[(&str, bool, CommandHandler)] = &[
    ("userinfo", false, Server::cmd_update_userinfo),
    ("disconnect", true, Server::cmd_disconnect),
    ("cp", false, Server::cmd_verify_paks),
    ("vdr", false, Server::cmd_reset_pure),
    ("download", false, Server::cmd_begin_download),
    ("nextdl", false, Server::cmd_next_download),
    ("stopdl", false, Server::cmd_stop_download),
    ("donedl", false, Server::cmd_done_download),
    ("wwwdl", false, Server::cmd_www_download),
    ("listmaps", false, Server::cmd_listmaps),
    ("maplist", false, Server::cmd_maplist),
    ("findmap", false, Server::cmd_findmap),
    ("mapinfo", false, Server::cmd_mapinfo),
    ("cv", false, Server::cmd_call_vote),
    ("vsay", false, Server::cmd_voice_chat),
    ("save", false, Server::cmd_save_state),
    ("load", false, Server::cmd_load_state),
];

impl Server {
    /// Runs one tokenized client command. Unrecognized commands from an
    /// in-world client go to the simulation.
    pub(crate) fn dispatch_client_command(
        &mut self,
        slot: usize,
        args: &[String],
        premaprestart: bool,
    ) {
        let name = match args.first() {
            Some(n) => n.to_ascii_lowercase(),
            None => return,
        };

        for (cmd, post_map_change, handler) in CLIENT_COMMANDS {
            if *cmd == name {
                if premaprestart && !post_map_change {
                    debug!(
                        "ignoring {} from {} during map change",
                        name, self.clients[slot].name
                    );
                    return;
                }
                handler(self, slot, args);
                return;
            }
        }

        if self.clients[slot].state == ClientState::Active {
            self.game.client_command(slot, args);
        }
    }

    fn cmd_update_userinfo(&mut self, slot: usize, args: &[String]) {
        let userinfo = match args.get(1) {
            Some(u) => u.clone(),
            None => return,
        };
        if !shared::info::validate(&userinfo) {
            return;
        }

        let decorated = self.name_decoration.apply(
            &userinfo,
            slot,
            self.config.numbered_names,
            &self.config.numbered_names_decoration,
        );
        self.clients[slot].userinfo = decorated;
        self.userinfo_changed(slot);
        let userinfo = self.clients[slot].userinfo.clone();
        self.game.client_userinfo_changed(slot, &userinfo);
    }

    fn cmd_disconnect(&mut self, slot: usize, _args: &[String]) {
        self.drop_client(slot, "disconnected");
    }

    /// The client's pure validation report ("cp").
    fn cmd_verify_paks(&mut self, slot: usize, args: &[String]) {
        if self.config.pure_mode == PureMode::Off {
            return;
        }
        // only the first report after each gamestate counts
        if self.clients[slot].got_cp {
            return;
        }
        self.clients[slot].got_cp = true;

        let verdict = pure::verify_pak_report(
            &args[1..],
            self.checksum_feed_server_id,
            self.config.module_checksums,
            &self.config.pak_checksums,
            self.checksum_feed,
        );

        match verdict {
            PureVerdict::Outdated => {
                // report for an older feed; the fresh gamestate will
                // prompt another
                self.clients[slot].got_cp = false;
            }
            PureVerdict::Pass => {
                self.clients[slot].pure_authentic = true;
            }
            PureVerdict::Fail => {
                self.clients[slot].pure_authentic = false;
                let name = self.clients[slot].name.clone();
                info!("{} failed pak validation", name);
                if self.config.pure_mode == PureMode::Lenient {
                    self.broadcast_server_command(&format!(
                        "cpm \"{}^7 has modified game files\n\"",
                        name
                    ));
                } else {
                    // one final snapshot so the client sees the drop reason
                    self.clients[slot].state = ClientState::Active;
                    self.send_client_snapshot(slot);
                    self.drop_client(
                        slot,
                        "Unpure client detected. Invalid .PK3 files referenced!",
                    );
                }
            }
        }
    }

    /// "vdr": client asks to redo pure validation after changing paks.
    fn cmd_reset_pure(&mut self, slot: usize, _args: &[String]) {
        self.clients[slot].pure_authentic = false;
        self.clients[slot].got_cp = false;
    }

    fn cmd_begin_download(&mut self, slot: usize, args: &[String]) {
        let name = match args.get(1) {
            Some(n) => n.clone(),
            None => return,
        };

        download::close_download(&mut self.clients[slot]);
        // www flags reset per request; the userinfo opt-in persists
        self.clients[slot].www_dl = false;
        self.clients[slot].wwwing = false;
        self.clients[slot].www_fallback = false;
        self.clients[slot].download_name = name;
        self.clients[slot].download_notify = DLNOTIFY_ALL;
    }

    fn cmd_next_download(&mut self, slot: usize, args: &[String]) {
        let block: i32 = match args.get(1).and_then(|b| b.parse().ok()) {
            Some(b) => b,
            None => return,
        };

        match download::acknowledge_block(&mut self.clients[slot], block, self.time) {
            AckResult::Advanced => {}
            AckResult::Completed => {
                download::close_download(&mut self.clients[slot]);
            }
            AckResult::Broken => {
                // the transfer is out of step and cannot recover
                self.drop_client(slot, "broken download");
            }
        }
    }

    fn cmd_stop_download(&mut self, slot: usize, _args: &[String]) {
        if !self.clients[slot].download_name.is_empty() {
            debug!(
                "clientDownload: {} : file \"{}\" aborted",
                slot, self.clients[slot].download_name
            );
        }
        download::close_download(&mut self.clients[slot]);
    }

    /// Client finished all its downloads and wants back in the game.
    fn cmd_done_download(&mut self, slot: usize, _args: &[String]) {
        if self.clients[slot].state == ClientState::Active {
            return;
        }
        self.send_client_gamestate(slot);
    }

    /// The redirected-download conversation.
    fn cmd_www_download(&mut self, slot: usize, args: &[String]) {
        let subcmd = args.get(1).map(String::as_str).unwrap_or("");

        if subcmd == "ack" {
            if self.clients[slot].wwwing {
                warn!(
                    "dupe wwwdl ack from client '{}'",
                    self.clients[slot].name
                );
            }
            if !self.clients[slot].www_dl {
                warn!(
                    "wwwdl ack from client '{}' with no download offered",
                    self.clients[slot].name
                );
                self.drop_client(slot, "client disconnected");
                return;
            }
            self.clients[slot].wwwing = true;
            return;
        }

        if subcmd == "bbl8r" {
            // client is away fetching the file and will reconnect
            self.drop_client(slot, "acking disconnected download mode");
            return;
        }

        if !self.clients[slot].wwwing {
            warn!(
                "unexpected wwwdl '{}' for client '{}'",
                subcmd, self.clients[slot].name
            );
            self.drop_client(slot, "unexpected wwwdl message");
            return;
        }

        match subcmd {
            "done" => {
                self.clients[slot].wwwing = false;
                self.clients[slot].download_name.clear();
            }
            "fail" => {
                warn!(
                    "client '{}' reported failure of www download '{}', reverting to direct transfer",
                    self.clients[slot].name, self.clients[slot].download_name
                );
                self.clients[slot].wwwing = false;
                self.clients[slot].www_fallback = true;
                self.send_client_gamestate(slot);
            }
            "chkfail" => {
                warn!(
                    "client '{}' reports bad checksum for www download '{}', reverting to direct transfer",
                    self.clients[slot].name, self.clients[slot].download_name
                );
                self.clients[slot].wwwing = false;
                self.clients[slot].www_fallback = true;
                self.send_client_gamestate(slot);
            }
            other => {
                warn!(
                    "unknown wwwdl subcommand '{}' for client '{}'",
                    other, self.clients[slot].name
                );
                self.drop_client(slot, "unknown wwwdl message");
            }
        }
    }

    /// Prints the map catalog, paced to one request per 200ms.
    fn cmd_listmaps(&mut self, slot: usize, _args: &[String]) {
        if !self.config.allow_listmaps {
            self.send_server_command(slot, "print \"Map listing is disabled.\n\"");
            return;
        }
        if self.time < self.clients[slot].next_server_command_time {
            return;
        }
        self.clients[slot].next_server_command_time = self.time + 200;

        let mut out = String::from("print \"Maps on this server:\n");
        let mut count = 0;
        for map in &self.config.map_names {
            if self.config.unlisted_maps.iter().any(|u| u == map) {
                continue;
            }
            out.push_str(map);
            out.push('\n');
            count += 1;
        }
        out.push_str(&format!("{} maps.\n\"", count));
        self.send_server_command(slot, &out);
    }

    /// Machine-readable map list, throttled harder than listmaps.
    fn cmd_maplist(&mut self, slot: usize, _args: &[String]) {
        if !self.config.allow_listmaps {
            return;
        }
        if self.time < self.clients[slot].next_maplist_time {
            return;
        }
        self.clients[slot].next_maplist_time = self.time + 1000;

        let maps: Vec<&str> = self
            .config
            .map_names
            .iter()
            .filter(|m| !self.config.unlisted_maps.iter().any(|u| &u == m))
            .map(String::as_str)
            .collect();
        let command = format!("maplist {}", maps.join(" "));
        self.send_server_command(slot, &command);
    }

    /// Substring search through the map catalog.
    fn cmd_findmap(&mut self, slot: usize, args: &[String]) {
        if !self.config.allow_listmaps {
            return;
        }
        if self.time < self.clients[slot].next_findmap_time {
            return;
        }
        self.clients[slot].next_findmap_time = self.time + 1000;

        let needle = match args.get(1) {
            Some(n) => n.to_ascii_lowercase(),
            None => return,
        };

        let mut out = String::from("print \"");
        let mut count = 0;
        for map in &self.config.map_names {
            if self.config.unlisted_maps.iter().any(|u| u == map) {
                continue;
            }
            if map.to_ascii_lowercase().contains(&needle) {
                out.push_str(map);
                out.push('\n');
                count += 1;
            }
        }
        out.push_str(&format!("{} maps matching.\n\"", count));
        self.send_server_command(slot, &out);
    }

    fn cmd_mapinfo(&mut self, slot: usize, _args: &[String]) {
        if self.time < self.clients[slot].next_server_command_time {
            return;
        }
        self.clients[slot].next_server_command_time = self.time + 200;

        let command = format!(
            "print \"map: {}\nphase: {}\n\"",
            self.mapname,
            self.vars.phase.as_i32()
        );
        self.send_server_command(slot, &command);
    }

    /// "cv": a vote request. The core marks the caller and announces the
    /// vote; tallying and the outcome belong to the simulation, which
    /// clears the flags through the console accessors.
    fn cmd_call_vote(&mut self, slot: usize, args: &[String]) {
        if self.clients[slot].state != ClientState::Active {
            return;
        }
        if args.len() < 2 {
            self.send_server_command(slot, "print \"Usage: cv <vote>\n\"");
            return;
        }
        if self.game.player_state(slot).voted {
            self.send_server_command(slot, "print \"You have already voted.\n\"");
            return;
        }
        self.game.player_state(slot).voted = true;

        let name = self.clients[slot].name.clone();
        let wanted = args[1..].join(" ");
        info!("{} called a vote: {}", name, wanted);
        self.broadcast_server_command(&format!(
            "print \"{}^7 called a vote: {}\n\"",
            name, wanted
        ));
    }

    /// Voice chat relay, throttled per client over a rolling window.
    fn cmd_voice_chat(&mut self, slot: usize, args: &[String]) {
        let id = match args.get(1) {
            Some(id) => id.clone(),
            None => return,
        };
        if self.clients[slot].state != ClientState::Active {
            return;
        }

        let min_interval = 30_000 / self.config.voice_chats_per_window.max(1);
        let cl = &mut self.clients[slot];
        if self.time < cl.voice_chat_time + min_interval {
            return;
        }
        cl.voice_chat_time = self.time;

        let command = format!("vchat 0 {} 50 {}", slot, id);
        self.broadcast_server_command(&command);
    }

    /// Stores the current player state in one of a few save slots.
    fn cmd_save_state(&mut self, slot: usize, args: &[String]) {
        if !self.config.allow_save {
            self.send_server_command(slot, "print \"Saving is disabled.\n\"");
            return;
        }
        if self.clients[slot].state != ClientState::Active {
            return;
        }
        let index = args
            .get(1)
            .and_then(|a| a.parse::<usize>().ok())
            .unwrap_or(0);
        if index >= self.clients[slot].saved_states.len() {
            return;
        }
        let state = self.game.player_state(slot).clone();
        self.clients[slot].saved_states[index] = Some(state);
        self.send_server_command(slot, &format!("print \"Saved slot {}.\n\"", index));
    }

    fn cmd_load_state(&mut self, slot: usize, args: &[String]) {
        if !self.config.allow_save {
            return;
        }
        if self.clients[slot].state != ClientState::Active {
            return;
        }
        let index = args
            .get(1)
            .and_then(|a| a.parse::<usize>().ok())
            .unwrap_or(0);
        let saved = match self
            .clients[slot]
            .saved_states
            .get(index)
            .and_then(|s| s.clone())
        {
            Some(s) => s,
            None => {
                self.send_server_command(slot, "print \"Nothing saved there.\n\"");
                return;
            }
        };
        *self.game.player_state(slot) = saved;
        self.send_server_command(slot, &format!("print \"Loaded slot {}.\n\"", index));
    }
}
