//! Network core: UDP socket management, the main tick loop, the
//! out-of-band connection handshake and the client drop path.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::challenge::{ChallengeTable, TempBanTable};
use crate::config::{GamePhase, ServerConfig, ServerVars};
use crate::download;
use crate::game::GameLogic;
use crate::session::{ClientSlot, ClientState, NameDecoration};
use shared::usercmd::UserCmd;
use shared::{info as infostring, msg::MsgReader, CS_SERVERINFO, CS_SYSTEMINFO, MAX_MSGLEN, OOB_MARKER, PROTOCOL_VERSION};

/// Events delivered to the main loop.
#[derive(Debug)]
pub enum ServerEvent {
    Datagram { data: Vec<u8>, addr: SocketAddr },
    Shutdown,
}

/// Authoritative game server. All state mutation happens on the task
/// running [`Server::run`]; network tasks only move bytes.
pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) vars: ServerVars,

    socket: Arc<UdpSocket>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    out_tx: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    out_rx: Option<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>,
    console_tx: mpsc::UnboundedSender<String>,
    console_rx: mpsc::UnboundedReceiver<String>,

    pub(crate) clients: Vec<ClientSlot>,
    pub(crate) challenges: ChallengeTable,
    pub(crate) tempbans: TempBanTable,
    pub(crate) game: Box<dyn GameLogic>,

    /// Server clock in milliseconds, advanced once per tick.
    pub(crate) time: i32,
    pub(crate) mapname: String,
    pub(crate) server_id: i32,
    pub(crate) restarted_server_id: i32,
    pub(crate) checksum_feed: i32,
    pub(crate) checksum_feed_server_id: i32,
    pub(crate) configstrings: Vec<String>,
    pub(crate) name_decoration: NameDecoration,
    /// Pending delayed restart, 0 when none.
    pub(crate) restart_time: i32,
    heartbeat_pending: bool,
    pub(crate) running: bool,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: ServerConfig,
        game: Box<dyn GameLogic>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (console_tx, console_rx) = mpsc::unbounded_channel();

        let max_clients = config.max_clients;
        let mut server = Server {
            config,
            vars: ServerVars::default(),
            socket,
            event_tx,
            event_rx,
            out_tx,
            out_rx: Some(out_rx),
            console_tx,
            console_rx,
            clients: (0..max_clients).map(|_| ClientSlot::new()).collect(),
            challenges: ChallengeTable::new(),
            tempbans: TempBanTable::new(),
            game,
            time: 0,
            mapname: String::new(),
            server_id: 0,
            restarted_server_id: 0,
            checksum_feed: 0,
            checksum_feed_server_id: 0,
            configstrings: vec![String::new(); shared::MAX_CONFIGSTRINGS],
            name_decoration: NameDecoration::default(),
            restart_time: 0,
            heartbeat_pending: false,
            running: true,
        };
        server.rebuild_info_configstrings();
        Ok(server)
    }

    /// Lines sent here are executed as operator console commands.
    pub fn console_sender(&self) -> mpsc::UnboundedSender<String> {
        self.console_tx.clone()
    }

    pub fn client(&self, slot: usize) -> &ClientSlot {
        &self.clients[slot]
    }

    /// Last value published by a script accessor command.
    pub fn return_value(&self) -> &str {
        &self.vars.return_value
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Drains datagrams queued for transmission. Once [`Server::run`] has
    /// taken over, transmission happens on its own task and this returns
    /// nothing.
    pub fn take_outbound(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut out = Vec::new();
        if let Some(rx) = self.out_rx.as_mut() {
            while let Ok(pair) = rx.try_recv() {
                out.push(pair);
            }
        }
        out
    }

    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_MSGLEN];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let data = buffer[..len].to_vec();
                        if event_tx.send(ServerEvent::Datagram { data, addr }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut out_rx = match self.out_rx.take() {
            Some(rx) => rx,
            None => return,
        };

        tokio::spawn(async move {
            while let Some((addr, data)) = out_rx.recv().await {
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Queues a raw datagram for transmission.
    pub(crate) fn queue_datagram(&self, addr: SocketAddr, data: Vec<u8>) {
        if let Err(e) = self.out_tx.send((addr, data)) {
            error!("Failed to queue packet for {}: {}", addr, e);
        }
    }

    /// Sends an out-of-band text line.
    pub(crate) fn send_oob(&self, addr: SocketAddr, line: &str) {
        let mut data = Vec::with_capacity(4 + line.len());
        data.extend_from_slice(&OOB_MARKER);
        data.extend_from_slice(line.as_bytes());
        self.queue_datagram(addr, data);
    }

    pub(crate) fn send_oob_print(&self, addr: SocketAddr, text: &str) {
        self.send_oob(addr, &format!("print\n{}\n", text));
    }

    /// Main loop: network events, console lines and the fixed tick.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick = interval(Duration::from_millis(self.config.tick_msec as u64));

        info!("Server started");

        while self.running {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(ServerEvent::Datagram { data, addr }) => {
                            self.handle_datagram(&data, addr);
                        }
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                line = self.console_rx.recv() => {
                    if let Some(line) = line {
                        let output = self.console_command(&line);
                        if !output.is_empty() {
                            info!("{}", output.trim_end());
                        }
                    }
                },

                _ = tick.tick() => {
                    self.tick();
                },
            }
        }

        Ok(())
    }

    /// One fixed-rate server frame.
    pub fn tick(&mut self) {
        self.time += self.config.tick_msec;

        if self.restart_time != 0 && self.time >= self.restart_time {
            self.restart_time = 0;
            let output = self.map_restart(&[]);
            if !output.is_empty() {
                info!("{}", output.trim_end());
            }
        }

        self.check_timeouts();
        self.game.run_frame(self.time);
        self.send_client_messages();
        self.flush_heartbeat();
    }

    /// Drops unresponsive clients and expires zombie slots.
    fn check_timeouts(&mut self) {
        let drop_point = self.time - self.config.timeout_secs * 1000;
        let zombie_point = self.time - self.config.zombie_secs * 1000;

        for i in 0..self.clients.len() {
            let cl = &self.clients[i];
            match cl.state {
                ClientState::Zombie => {
                    if cl.last_packet_time < zombie_point {
                        debug!("Going from CS_ZOMBIE to CS_FREE for slot {}", i);
                        self.clients[i].reset();
                    }
                }
                ClientState::Connected | ClientState::Primed | ClientState::Active => {
                    if !cl.is_bot && !cl.is_local && cl.last_packet_time < drop_point {
                        self.drop_client(i, "timed out");
                    }
                }
                ClientState::Free => {}
            }
        }
    }

    /// Routes one inbound datagram.
    pub fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        if data.len() >= 4 && data[..4] == OOB_MARKER {
            let line = String::from_utf8_lossy(&data[4..]);
            self.connectionless_packet(line.trim_end_matches(['\n', '\0']), addr);
            return;
        }

        // in-session traffic routes by address and qport
        let mut r = MsgReader::new(data);
        let qport = match r.read_u16() {
            Ok(q) => q,
            Err(_) => return,
        };

        let slot = self.clients.iter().position(|cl| {
            cl.state != ClientState::Free
                && cl.qport == qport
                && cl
                    .addr
                    .map(|a| a.ip() == addr.ip())
                    .unwrap_or(false)
        });

        let slot = match slot {
            Some(s) => s,
            None => {
                debug!("Packet from unknown source {} (qport {})", addr, qport);
                return;
            }
        };

        // the client may have moved to a new port
        if self.clients[slot].addr.map(|a| a.port()) != Some(addr.port()) {
            self.clients[slot].addr = Some(addr);
        }

        if self.clients[slot].state == ClientState::Zombie {
            return;
        }

        self.clients[slot].incoming_sequence += 1;
        self.clients[slot].last_packet_time = self.time;
        self.execute_client_message(slot, &mut r);
    }

    /// Out-of-band commands: handshake, status and remote console.
    fn connectionless_packet(&mut self, line: &str, addr: SocketAddr) {
        let args = crate::commands::tokenize(line);
        let cmd = match args.first() {
            Some(c) => c.to_ascii_lowercase(),
            None => return,
        };

        debug!("OOB packet from {}: {}", addr, cmd);

        match cmd.as_str() {
            "getchallenge" => self.get_challenge(addr),
            "connect" => self.direct_connect(&args, addr),
            "rcon" => self.remote_command(&args, line, addr),
            "ping" => self.send_oob(addr, "ack"),
            "disconnect" => {}
            _ => debug!("bad connectionless packet from {}: {}", addr, line),
        }
    }

    fn get_challenge(&mut self, addr: SocketAddr) {
        if self.tempbans.is_banned(addr.ip(), self.time) {
            let message = self.config.tempban_message.clone();
            self.send_oob_print(addr, &message);
            return;
        }

        let token = self.challenges.issue(addr, self.time);
        self.send_oob(addr, &format!("challengeResponse {}", token));
    }

    fn remote_command(&mut self, args: &[String], line: &str, addr: SocketAddr) {
        let password_ok = !self.config.rcon_password.is_empty()
            && args.get(1).map(|p| p == &self.config.rcon_password).unwrap_or(false);

        if !password_ok {
            warn!("Bad rcon from {}: {}", addr, line);
            self.send_oob_print(addr, "Bad rconpassword.");
            return;
        }

        // everything after the password is the command line
        let command = args[2..].join(" ");
        info!("Rcon from {}: {}", addr, command);
        let output = self.console_command(&command);
        self.send_oob_print(addr, &output);
    }

    fn is_local_address(addr: SocketAddr) -> bool {
        addr.ip().is_loopback()
    }

    fn is_lan_address(addr: SocketAddr) -> bool {
        match addr.ip() {
            IpAddr::V4(ip) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
            IpAddr::V6(ip) => ip.is_loopback(),
        }
    }

    /// A "connect" request carrying the userinfo string.
    fn direct_connect(&mut self, args: &[String], addr: SocketAddr) {
        debug!("direct_connect from {}", addr);

        let mut userinfo = match args.get(1) {
            Some(u) => u.clone(),
            None => return,
        };
        if !infostring::validate(&userinfo) {
            self.send_oob_print(addr, "[err_dialog]Invalid userinfo.");
            return;
        }

        let version: i32 = infostring::value_for_key(&userinfo, "protocol")
            .parse()
            .unwrap_or(0);
        if version != PROTOCOL_VERSION {
            self.send_oob_print(
                addr,
                &format!("[err_prot]Server uses protocol version {}.", PROTOCOL_VERSION),
            );
            debug!("    rejected connect from version {}", version);
            return;
        }

        let challenge: i32 = infostring::value_for_key(&userinfo, "challenge")
            .parse()
            .unwrap_or(0);
        let qport: u16 = infostring::value_for_key(&userinfo, "qport")
            .parse()
            .unwrap_or(0);

        if self.tempbans.is_banned(addr.ip(), self.time) {
            let message = self.config.tempban_message.clone();
            self.send_oob_print(addr, &message);
            return;
        }

        // quick reject: a known channel reconnecting too fast
        for cl in &self.clients {
            if let Some(a) = cl.addr {
                if a.ip() == addr.ip() && (cl.qport == qport || a.port() == addr.port()) {
                    if self.time - cl.last_connect_time
                        < self.config.reconnect_limit_secs * 1000
                    {
                        debug!("{}: reconnect rejected: too soon", addr);
                        return;
                    }
                    break;
                }
            }
        }

        let is_local = Self::is_local_address(addr);

        if !is_local {
            let ping;
            match self.challenges.find_mut(addr, challenge) {
                Some(entry) => {
                    if entry.first_ping == 0 {
                        entry.first_ping = self.time - entry.ping_time;
                    }
                    ping = entry.first_ping;
                    entry.connected = true;
                }
                None => {
                    self.send_oob_print(addr, "[err_dialog]No or bad challenge for address.");
                    return;
                }
            }
            info!("Client {} connecting with {} challenge ping", addr, ping);

            if let Some(updated) = infostring::set_value_for_key(&userinfo, "ip", &addr.to_string())
            {
                userinfo = updated;
            }

            if !Self::is_lan_address(addr) {
                if self.config.min_ping_ms > 0 && ping < self.config.min_ping_ms {
                    self.send_oob_print(addr, "[err_dialog]Server is for high pings only");
                    debug!("Client {} rejected on a too low ping", addr);
                    return;
                }
                if self.config.max_ping_ms > 0 && ping > self.config.max_ping_ms {
                    self.send_oob_print(addr, "[err_dialog]Server is for low pings only");
                    debug!("Client {} rejected on a too high ping: {}", addr, ping);
                    return;
                }
            }
        } else if let Some(updated) = infostring::set_value_for_key(&userinfo, "ip", "localhost") {
            userinfo = updated;
        }

        // reuse the slot of a reconnecting channel
        let mut slot = None;
        for (i, cl) in self.clients.iter().enumerate() {
            if cl.state == ClientState::Free {
                continue;
            }
            if let Some(a) = cl.addr {
                if a.ip() == addr.ip() && (cl.qport == qport || a.port() == addr.port()) {
                    info!("{}: reconnect", addr);
                    slot = Some(i);
                    break;
                }
            }
        }

        let slot = match slot {
            Some(s) => s,
            None => {
                // private slots open up with the right password
                let password = infostring::value_for_key(&userinfo, "password");
                let start_index = if !self.config.private_password.is_empty()
                    && password == self.config.private_password
                {
                    0
                } else {
                    self.config.private_clients
                };

                let free = (start_index..self.clients.len())
                    .find(|&i| self.clients[i].state == ClientState::Free);

                match free {
                    Some(i) => i,
                    None => {
                        if is_local {
                            // evict a bot to make room for the local player
                            let bots = (start_index..self.clients.len())
                                .filter(|&i| self.clients[i].is_bot)
                                .count();
                            if bots >= self.clients.len() - start_index {
                                let last = self.clients.len() - 1;
                                self.drop_client(last, "only bots on server");
                                last
                            } else {
                                error!("server is full on local connect");
                                return;
                            }
                        } else {
                            let message = self.config.full_message.clone();
                            self.send_oob_print(addr, &message);
                            debug!("Rejected a connection.");
                            return;
                        }
                    }
                }
            }
        };

        // this is the only place a slot is ever (re)initialized
        self.clients[slot].reset();
        let cl = &mut self.clients[slot];
        cl.challenge = challenge;
        cl.addr = Some(addr);
        cl.qport = qport;
        cl.is_local = is_local;
        cl.userinfo = userinfo;

        let decorated = self.name_decoration.apply(
            &self.clients[slot].userinfo,
            slot,
            self.config.numbered_names,
            &self.config.numbered_names_decoration,
        );
        self.clients[slot].userinfo = decorated;

        // the simulation may refuse the connection outright
        if let Some(denied) = self.game.client_connect(slot, true, false) {
            self.send_oob_print(addr, &format!("[err_dialog]{}", denied));
            debug!("Game rejected a connection: {}", denied);
            self.clients[slot].reset();
            return;
        }

        self.userinfo_changed(slot);
        let userinfo = self.clients[slot].userinfo.clone();
        self.game.client_userinfo_changed(slot, &userinfo);

        if !self.config.first_message.is_empty() {
            let message = format!("chat \"{}\"", self.config.first_message);
            self.send_server_command(slot, &message);
        }

        if let Some(entry) = self.challenges.find_mut(addr, challenge) {
            entry.first_ping = 0;
        }

        self.send_oob(addr, "connectResponse");

        debug!("Going from CS_FREE to CS_CONNECTED for {}", self.clients[slot].name);
        let now = self.time;
        let cl = &mut self.clients[slot];
        cl.state = ClientState::Connected;
        cl.next_snapshot_time = now;
        cl.last_packet_time = now;
        cl.last_connect_time = now;
        // first in-session packet will carry a stale server id and force
        // the gamestate out
        cl.gamestate_message_num = -1;

        let count = self
            .clients
            .iter()
            .filter(|c| c.state >= ClientState::Connected)
            .count();
        if count == 1 || count == self.clients.len() {
            self.heartbeat();
        }
    }

    /// Pulls the server-relevant keys out of a changed userinfo.
    pub(crate) fn userinfo_changed(&mut self, slot: usize) {
        let lan = self.clients[slot]
            .addr
            .map(Self::is_lan_address)
            .unwrap_or(true);
        let cl = &mut self.clients[slot];

        cl.name = infostring::value_for_key(&cl.userinfo, "name");

        if lan && self.config.lan_force_rate {
            cl.rate = 99999;
        } else {
            let val = infostring::value_for_key(&cl.userinfo, "rate");
            cl.rate = match val.parse::<i32>() {
                Ok(r) => r.clamp(1000, 90000),
                Err(_) => 5000,
            };
        }

        let snaps = infostring::value_for_key(&cl.userinfo, "snaps")
            .parse::<i32>()
            .unwrap_or(20)
            .clamp(1, 30);
        cl.snapshot_msec = 1000 / snaps;

        cl.www_ok = infostring::value_for_key(&cl.userinfo, "cl_wwwDownload")
            .parse::<i32>()
            .map(|v| v != 0)
            .unwrap_or(false);
    }

    /// Queues a reliable command for one client, dropping it on overflow.
    pub(crate) fn send_server_command(&mut self, slot: usize, command: &str) {
        if !self.clients[slot].queue_reliable(command) {
            warn!(
                "Server command overflow for {} (seq {})",
                self.clients[slot].name, self.clients[slot].reliable_sequence
            );
            self.drop_client(slot, "Server command overflow");
        }
    }

    /// Queues a reliable command for every connected client.
    pub(crate) fn broadcast_server_command(&mut self, command: &str) {
        for i in 0..self.clients.len() {
            if self.clients[i].state >= ClientState::Connected {
                self.send_server_command(i, command);
            }
        }
    }

    /// Final exit path for a client, willing or not. Idempotent on
    /// zombie slots.
    pub(crate) fn drop_client(&mut self, slot: usize, reason: &str) {
        if self.clients[slot].state == ClientState::Zombie {
            return; // already dropped
        }

        let is_bot = self.clients[slot].is_bot;
        if !is_bot {
            if let Some(addr) = self.clients[slot].addr {
                self.challenges.mark_disconnected(addr);
            }
            download::close_download(&mut self.clients[slot]);
        }

        let name = self.clients[slot].name.clone();
        self.broadcast_server_command(&format!("cpm \"{}^7 {}\n\"", name, reason));

        debug!("Going to CS_ZOMBIE for {}", name);
        self.clients[slot].state = ClientState::Zombie;
        self.clients[slot].last_packet_time = self.time;

        self.game.client_disconnect(slot);

        self.send_server_command(slot, &format!("disconnect \"{}\"", reason));

        self.clients[slot].userinfo.clear();

        let connected = self
            .clients
            .iter()
            .filter(|c| c.state >= ClientState::Connected)
            .count();
        if connected == 0 {
            self.heartbeat();
        }
    }

    /// Client finished loading; first movement command arrived.
    pub(crate) fn client_enter_world(&mut self, slot: usize, cmd: UserCmd) {
        debug!(
            "Going from CS_PRIMED to CS_ACTIVE for {}",
            self.clients[slot].name
        );
        let now = self.time;
        let cl = &mut self.clients[slot];
        cl.state = ClientState::Active;
        cl.delta_message = -1;
        cl.next_snapshot_time = now; // snapshot immediately
        cl.last_usercmd = cmd;

        self.game.client_begin(slot);
    }

    pub(crate) fn heartbeat(&mut self) {
        self.heartbeat_pending = true;
    }

    fn flush_heartbeat(&mut self) {
        if !self.heartbeat_pending {
            return;
        }
        self.heartbeat_pending = false;

        let master = match &self.config.master_address {
            Some(m) => m.clone(),
            None => return,
        };
        match master.parse::<SocketAddr>() {
            Ok(addr) => {
                info!("Sending heartbeat to {}", addr);
                self.send_oob(addr, &format!("heartbeat {}\n", self.config.hostname));
            }
            Err(e) => warn!("Bad master address {}: {}", master, e),
        }
    }

    /// Replaces a configstring and pushes the change to everyone in-world.
    pub(crate) fn set_configstring(&mut self, index: usize, value: &str) {
        if index >= self.configstrings.len() || self.configstrings[index] == value {
            return;
        }
        self.configstrings[index] = value.to_string();

        let command = format!("cs {} \"{}\"", index, value);
        for i in 0..self.clients.len() {
            if self.clients[i].state == ClientState::Active {
                self.send_server_command(i, &command);
            }
        }
    }

    pub(crate) fn rebuild_info_configstrings(&mut self) {
        let serverinfo = self.build_serverinfo();
        let systeminfo = self.build_systeminfo();
        self.set_configstring(CS_SERVERINFO, &serverinfo);
        self.set_configstring(CS_SYSTEMINFO, &systeminfo);
    }

    pub(crate) fn build_serverinfo(&self) -> String {
        let mut info = String::new();
        for (key, value) in [
            ("sv_hostname", self.config.hostname.as_str()),
            ("mapname", self.mapname.as_str()),
            ("protocol", &PROTOCOL_VERSION.to_string()),
            // private slots are invisible in the advertised count
            (
                "sv_maxclients",
                &(self.config.max_clients - self.config.private_clients).to_string(),
            ),
            ("gamestate", &self.vars.phase.as_i32().to_string()),
        ] {
            if let Some(updated) = infostring::set_value_for_key(&info, key, value) {
                info = updated;
            }
        }
        info
    }

    pub(crate) fn build_systeminfo(&self) -> String {
        let pak_checksums = self
            .config
            .pak_checksums
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let pak_names = self.config.pak_names.join(" ");

        let mut info = String::new();
        for (key, value) in [
            ("sv_serverid", self.server_id.to_string()),
            (
                "sv_pure",
                (if self.config.pure_mode == crate::config::PureMode::Off {
                    0
                } else {
                    1
                })
                .to_string(),
            ),
            ("sv_paks", pak_checksums),
            ("sv_pakNames", pak_names),
            ("sv_cheats", (self.vars.cheats as i32).to_string()),
        ] {
            if let Some(updated) = infostring::set_value_for_key(&info, key, &value) {
                info = updated;
            }
        }
        info
    }

    /// Brings up a new map. Resets identifiers, rebuilds configstrings
    /// and walks every connected client through the gamestate cycle.
    pub(crate) fn spawn_server(&mut self, mapname: &str) {
        info!("Spawning server: {}", mapname);

        self.mapname = mapname.to_string();
        self.server_id = self.time;
        self.restarted_server_id = self.server_id;

        let mut rng = rand::thread_rng();
        self.checksum_feed = rng.gen::<i32>();
        self.checksum_feed_server_id = self.server_id;

        self.vars.phase = GamePhase::Initialize;
        self.configstrings = vec![String::new(); shared::MAX_CONFIGSTRINGS];
        self.rebuild_info_configstrings();

        self.game.run_frame(self.time);
        self.vars.phase = GamePhase::Playing;
        self.rebuild_info_configstrings();

        // reconnect everyone who was on the previous map
        for i in 0..self.clients.len() {
            if self.clients[i].state < ClientState::Connected {
                continue;
            }
            let is_bot = self.clients[i].is_bot;
            if let Some(denied) = self.game.client_connect(i, false, is_bot) {
                self.drop_client(i, &denied);
                continue;
            }
            // the next packet carries a stale server id, forcing a
            // gamestate retransmit
            self.clients[i].state = ClientState::Connected;
            self.clients[i].gamestate_message_num = -1;
        }
    }
}
