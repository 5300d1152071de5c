//! Per-client session state. The slot table is fixed at startup and never
//! reordered, so a slot index identifies a client for its whole connection.

use std::net::SocketAddr;

use shared::info;
use shared::msg::MsgWriter;
use shared::usercmd::UserCmd;
use shared::{PlayerState, ServerOp, MAX_RELIABLE_COMMANDS};

/// Connection lifecycle. Order matters: comparisons like
/// `state >= Connected` select every live client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    /// Slot can be reused.
    Free,
    /// Dropped, lingering briefly so late packets don't respawn the slot.
    Zombie,
    /// Accepted, not yet past the gamestate.
    Connected,
    /// Gamestate sent, waiting for the first movement command.
    Primed,
    /// In the world.
    Active,
}

/// Last time each input was observed, for idle detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserCmdTimes {
    pub buttons: [i32; 8],
    pub wbuttons: [i32; 8],
    pub forwardmove: i32,
    pub rightmove: i32,
    pub upmove: i32,
}

/// An in-band file transfer in flight. The file stays open for the
/// duration and is read one block at a time as the window advances.
#[derive(Debug)]
pub struct ActiveDownload {
    pub file: std::fs::File,
    pub size: usize,
    pub blocks: Vec<Vec<u8>>,
    /// Next block to fill from the file.
    pub current_block: i32,
    /// Oldest block the client has not acknowledged.
    pub client_block: i32,
    /// Next block to put on the wire.
    pub xmit_block: i32,
    /// Bytes of the file consumed into blocks so far.
    pub count: usize,
    pub eof: bool,
    pub send_time: i32,
}

pub const DLNOTIFY_BEGIN: u8 = 0x01;
pub const DLNOTIFY_REDIRECT: u8 = 0x02;
pub const DLNOTIFY_ALL: u8 = DLNOTIFY_BEGIN | DLNOTIFY_REDIRECT;

/// Everything the server tracks about one client slot.
#[derive(Debug)]
pub struct ClientSlot {
    pub state: ClientState,
    pub addr: Option<SocketAddr>,
    pub qport: u16,
    pub is_bot: bool,
    pub is_local: bool,

    pub userinfo: String,
    pub name: String,
    pub challenge: i32,

    // netchan bookkeeping
    pub outgoing_sequence: i32,
    pub incoming_sequence: i32,
    pub message_acknowledge: i32,
    pub delta_message: i32,

    // reliable command ring
    pub reliable_commands: Vec<String>,
    pub reliable_sequence: i32,
    pub reliable_acknowledge: i32,
    pub reliable_sent: i32,

    pub last_client_command: i32,
    pub last_client_command_string: String,
    pub gamestate_message_num: i32,

    pub last_usercmd: UserCmd,
    pub last_usercmd_times: UserCmdTimes,
    pub last_activity_time: i32,

    pub last_packet_time: i32,
    pub last_connect_time: i32,
    pub next_snapshot_time: i32,
    pub rate: i32,
    pub snapshot_msec: i32,
    pub ping: i32,

    // pure validation
    pub pure_authentic: bool,
    pub got_cp: bool,

    // download session
    pub download_name: String,
    pub download: Option<ActiveDownload>,
    pub download_notify: u8,
    /// Client opted into redirected downloads in its userinfo.
    pub www_ok: bool,
    /// Server offered this client a redirect.
    pub www_dl: bool,
    /// Client acknowledged and is fetching over http.
    pub wwwing: bool,
    /// Redirect failed; next attempt uses the fallback path.
    pub www_fallback: bool,

    // command pacing
    pub next_reliable_time: i32,
    pub next_findmap_time: i32,
    pub next_maplist_time: i32,
    pub next_server_command_time: i32,
    pub voice_chat_time: i32,

    pub saved_states: [Option<PlayerState>; 3],
}

impl ClientSlot {
    pub fn new() -> Self {
        ClientSlot {
            state: ClientState::Free,
            addr: None,
            qport: 0,
            is_bot: false,
            is_local: false,
            userinfo: String::new(),
            name: String::new(),
            challenge: 0,
            outgoing_sequence: 0,
            incoming_sequence: 0,
            message_acknowledge: 0,
            delta_message: -1,
            reliable_commands: vec![String::new(); MAX_RELIABLE_COMMANDS],
            reliable_sequence: 0,
            reliable_acknowledge: 0,
            reliable_sent: 0,
            last_client_command: 0,
            last_client_command_string: String::new(),
            gamestate_message_num: -1,
            last_usercmd: UserCmd::default(),
            last_usercmd_times: UserCmdTimes::default(),
            last_activity_time: 0,
            last_packet_time: 0,
            last_connect_time: 0,
            next_snapshot_time: 0,
            rate: 5000,
            snapshot_msec: 50,
            ping: 0,
            pure_authentic: false,
            got_cp: false,
            download_name: String::new(),
            download: None,
            download_notify: 0,
            www_ok: false,
            www_dl: false,
            wwwing: false,
            www_fallback: false,
            next_reliable_time: 0,
            next_findmap_time: 0,
            next_maplist_time: 0,
            next_server_command_time: 0,
            voice_chat_time: 0,
            saved_states: [None, None, None],
        }
    }

    /// Wipes the slot back to a fresh connection, keeping nothing.
    pub fn reset(&mut self) {
        *self = ClientSlot::new();
    }

    /// Appends a reliable command for (re)delivery with every outgoing
    /// message until acknowledged. Returns false when the ring overflowed,
    /// meaning the client has to be dropped.
    #[must_use]
    pub fn queue_reliable(&mut self, cmd: &str) -> bool {
        self.reliable_sequence += 1;
        if self.reliable_sequence - self.reliable_acknowledge
            == MAX_RELIABLE_COMMANDS as i32 + 1
        {
            return false;
        }
        let index = (self.reliable_sequence as usize) & (MAX_RELIABLE_COMMANDS - 1);
        self.reliable_commands[index] = cmd.to_string();
        true
    }

    pub fn reliable_command(&self, sequence: i32) -> &str {
        &self.reliable_commands[(sequence as usize) & (MAX_RELIABLE_COMMANDS - 1)]
    }

    /// Rewrites every unacknowledged reliable command into `w`.
    pub fn write_pending_reliable(&mut self, w: &mut MsgWriter) {
        for seq in self.reliable_acknowledge + 1..=self.reliable_sequence {
            w.write_u8(ServerOp::ServerCommand as u8);
            w.write_i32(seq);
            w.write_string(self.reliable_command(seq));
        }
        self.reliable_sent = self.reliable_sequence;
    }

    /// True for any state that holds a connection.
    pub fn is_connected(&self) -> bool {
        self.state >= ClientState::Connected
    }
}

impl Default for ClientSlot {
    fn default() -> Self {
        ClientSlot::new()
    }
}

/// Cached split of the numbered-name decoration setting, recomputed only
/// when the setting changes.
#[derive(Debug, Default)]
pub struct NameDecoration {
    source: String,
    prefix: String,
    suffix: String,
}

impl NameDecoration {
    fn refresh(&mut self, decoration: &str) {
        if self.source == decoration {
            return;
        }
        self.source = decoration.to_string();
        match decoration.rfind(';') {
            Some(pos) => {
                self.suffix = decoration[pos + 1..].to_string();
                // the prefix stops at the first separator
                let head = &decoration[..pos];
                self.prefix = match head.find(';') {
                    Some(p) => head[..p].to_string(),
                    None => head.to_string(),
                };
            }
            None => {
                self.prefix = decoration.to_string();
                self.suffix.clear();
            }
        }
    }

    /// Prefixes the userinfo name with the slot number per `mode` (1..=4)
    /// and stashes the undecorated name under "originalname".
    pub fn apply(
        &mut self,
        userinfo: &str,
        slot: usize,
        mode: u8,
        decoration: &str,
    ) -> String {
        self.refresh(decoration);

        let original = info::value_for_key(userinfo, "name");
        let mut out = info::set_value_for_key(userinfo, "originalname", &original)
            .unwrap_or_else(|| userinfo.to_string());

        if mode == 0 {
            return out;
        }

        let new_name = match mode {
            2 => format!("{}{:2} {}{}", self.prefix, slot, self.suffix, original),
            3 => format!("{}{:02} {}{}", self.prefix, slot, self.suffix, original),
            4 => {
                if slot < 10 {
                    format!("{}{}  {}{}", self.prefix, slot, self.suffix, original)
                } else {
                    format!("{}{} {}{}", self.prefix, slot, self.suffix, original)
                }
            }
            _ => format!("{}{} {}{}", self.prefix, slot, self.suffix, original),
        };
        if let Some(updated) = info::set_value_for_key(&out, "name", &new_name) {
            out = updated;
        }
        out
    }
}

/// Strips `^x` color escapes for display-insensitive name comparison.
pub fn strip_color_codes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            if chars.next().is_none() {
                break;
            }
            continue;
        }
        out.push(c);
    }
    out
}
