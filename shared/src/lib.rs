//! Wire protocol and shared types for the game server.
//!
//! Everything the server core and its tests need to agree on byte-for-byte
//! lives here: the message codec, the packet tags, the delta-compressed
//! movement command encoding, and the user-info string format.

pub mod info;
pub mod msg;
pub mod usercmd;

use serde::{Deserialize, Serialize};

/// Bumped whenever the wire format changes incompatibly.
pub const PROTOCOL_VERSION: i32 = 84;

/// Four 0xFF bytes prefixing every out-of-band (connectionless) datagram.
pub const OOB_MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Window of unacknowledged reliable commands per client. A producer that
/// outruns this window indicates protocol desync and forces a disconnect.
pub const MAX_RELIABLE_COMMANDS: usize = 64;

/// How many download blocks may be in flight unacknowledged.
pub const MAX_DOWNLOAD_WINDOW: usize = 8;

/// Size of a single in-band download block.
pub const DOWNLOAD_BLOCK_SIZE: usize = 1024;

/// Upper bound on movement commands packed into one packet.
pub const MAX_PACKET_USERCMDS: usize = 32;

/// Upper bound on the trailing binary blob of an in-session packet.
pub const MAX_BINARY_MESSAGE: usize = 32768;

/// Slots in the rolling challenge table.
pub const MAX_CHALLENGES: usize = 1024;

/// Slots in the temporary ban table.
pub const MAX_TEMPBAN_ADDRESSES: usize = 64;

/// Largest message the server will assemble or accept.
pub const MAX_MSGLEN: usize = 16384;

/// Configstring indices the core itself cares about.
pub const CS_SERVERINFO: usize = 0;
pub const CS_SYSTEMINFO: usize = 1;
pub const CS_WARMUP: usize = 2;
pub const MAX_CONFIGSTRINGS: usize = 1024;

/// Server to client message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOp {
    Gamestate = 2,
    Configstring = 3,
    Baseline = 4,
    ServerCommand = 5,
    Download = 6,
    Snapshot = 7,
    Eof = 8,
}

impl ServerOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            2 => Some(ServerOp::Gamestate),
            3 => Some(ServerOp::Configstring),
            4 => Some(ServerOp::Baseline),
            5 => Some(ServerOp::ServerCommand),
            6 => Some(ServerOp::Download),
            7 => Some(ServerOp::Snapshot),
            8 => Some(ServerOp::Eof),
            _ => None,
        }
    }
}

/// Client to server message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientOp {
    Move = 4,
    MoveNoDelta = 5,
    ClientCommand = 6,
    Eof = 8,
}

impl ClientOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            4 => Some(ClientOp::Move),
            5 => Some(ClientOp::MoveNoDelta),
            6 => Some(ClientOp::ClientCommand),
            8 => Some(ClientOp::Eof),
            _ => None,
        }
    }
}

/// Download message flag bits carried in the redirect payload.
pub const DL_FLAG_DISCON: u32 = 1 << 0;
pub const DL_FLAG_URL: u32 = 1 << 1;

/// The slice of simulation state the core reads and writes on behalf of the
/// operator console and the save/load aids. The simulation owns the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerState {
    pub health: i32,
    pub score: i32,
    pub velocity: [f32; 3],
    pub viewangles: [f32; 3],
    pub delta_angles: [i16; 3],
    pub origin: [f32; 3],
    pub weapons: [u32; 2],
    pub weapon: u8,
    pub weapon_state: i32,
    pub class_weapon_time: i32,
    pub pm_flags: u32,
    pub pm_time: i32,
    pub stat_keys: u32,
    pub voted: bool,
}

impl PlayerState {
    pub fn has_weapon(&self, weapon: u8) -> bool {
        let (word, bit) = (weapon as usize / 32, weapon as usize % 32);
        word < 2 && self.weapons[word] & (1 << bit) != 0
    }

    pub fn give_weapon(&mut self, weapon: u8) {
        let (word, bit) = (weapon as usize / 32, weapon as usize % 32);
        if word < 2 {
            self.weapons[word] |= 1 << bit;
        }
    }

    pub fn take_weapon(&mut self, weapon: u8) {
        let (word, bit) = (weapon as usize / 32, weapon as usize % 32);
        if word < 2 {
            self.weapons[word] &= !(1 << bit);
        }
    }
}

/// Converts a view angle in degrees to the 16-bit wire representation.
pub fn angle_to_short(angle: f32) -> i16 {
    ((angle * 65536.0 / 360.0) as i32 & 0xFFFF) as u16 as i16
}
