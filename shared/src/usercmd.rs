//! Movement command encoding. Commands travel as deltas against the
//! previous command in the batch, with every changed field obfuscated by a
//! key both sides derive from the connection state. A stale or spoofed
//! packet decodes to garbage and fails downstream validation instead of
//! moving the player.

use serde::{Deserialize, Serialize};

use crate::msg::{MsgError, MsgReader, MsgWriter};

/// One client movement sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCmd {
    pub server_time: i32,
    pub angles: [i16; 3],
    pub forwardmove: i8,
    pub rightmove: i8,
    pub upmove: i8,
    pub buttons: u8,
    pub wbuttons: u8,
    pub weapon: u8,
}

const CM_ANGLE0: u16 = 1 << 0;
const CM_ANGLE1: u16 = 1 << 1;
const CM_ANGLE2: u16 = 1 << 2;
const CM_FORWARD: u16 = 1 << 3;
const CM_RIGHT: u16 = 1 << 4;
const CM_UP: u16 = 1 << 5;
const CM_BUTTONS: u16 = 1 << 6;
const CM_WBUTTONS: u16 = 1 << 7;
const CM_WEAPON: u16 = 1 << 8;

/// Case-insensitive 32-bit hash over a command string, fed into the
/// movement key so both sides must agree on the last acknowledged
/// reliable command.
pub fn command_hash(s: &str) -> u32 {
    let mut hash: u32 = 0;
    for (i, b) in s.bytes().enumerate() {
        let c = b.to_ascii_lowercase() as u32;
        hash = hash.wrapping_add(c.wrapping_mul(119 + i as u32));
    }
    hash ^ (hash >> 10) ^ (hash >> 20)
}

fn keystream(key: u32, server_time: i32) -> u32 {
    // Mix the timestamp in so replaying a batch at a different time fails.
    let mut k = key ^ server_time as u32;
    k = k.wrapping_mul(0x9E37_79B9);
    k ^ (k >> 16)
}

impl UserCmd {
    /// Writes `self` as a delta against `from`. Fields equal to `from`
    /// cost nothing beyond the change mask.
    pub fn write_delta(&self, w: &mut MsgWriter, from: &UserCmd, key: u32) {
        w.write_i32(self.server_time);
        let k = keystream(key, self.server_time);

        let mut mask: u16 = 0;
        if self.angles[0] != from.angles[0] {
            mask |= CM_ANGLE0;
        }
        if self.angles[1] != from.angles[1] {
            mask |= CM_ANGLE1;
        }
        if self.angles[2] != from.angles[2] {
            mask |= CM_ANGLE2;
        }
        if self.forwardmove != from.forwardmove {
            mask |= CM_FORWARD;
        }
        if self.rightmove != from.rightmove {
            mask |= CM_RIGHT;
        }
        if self.upmove != from.upmove {
            mask |= CM_UP;
        }
        if self.buttons != from.buttons {
            mask |= CM_BUTTONS;
        }
        if self.wbuttons != from.wbuttons {
            mask |= CM_WBUTTONS;
        }
        if self.weapon != from.weapon {
            mask |= CM_WEAPON;
        }
        w.write_u16(mask);

        if mask & CM_ANGLE0 != 0 {
            w.write_i16(self.angles[0] ^ k as i16);
        }
        if mask & CM_ANGLE1 != 0 {
            w.write_i16(self.angles[1] ^ (k >> 8) as i16);
        }
        if mask & CM_ANGLE2 != 0 {
            w.write_i16(self.angles[2] ^ (k >> 16) as i16);
        }
        if mask & CM_FORWARD != 0 {
            w.write_u8(self.forwardmove as u8 ^ k as u8);
        }
        if mask & CM_RIGHT != 0 {
            w.write_u8(self.rightmove as u8 ^ (k >> 8) as u8);
        }
        if mask & CM_UP != 0 {
            w.write_u8(self.upmove as u8 ^ (k >> 16) as u8);
        }
        if mask & CM_BUTTONS != 0 {
            w.write_u8(self.buttons ^ (k >> 24) as u8);
        }
        if mask & CM_WBUTTONS != 0 {
            w.write_u8(self.wbuttons ^ k as u8);
        }
        if mask & CM_WEAPON != 0 {
            w.write_u8(self.weapon ^ (k >> 8) as u8);
        }
    }

    /// Reads a delta written by [`write_delta`](Self::write_delta).
    pub fn read_delta(r: &mut MsgReader<'_>, from: &UserCmd, key: u32) -> Result<UserCmd, MsgError> {
        let server_time = r.read_i32()?;
        let k = keystream(key, server_time);
        let mask = r.read_u16()?;

        let mut cmd = *from;
        cmd.server_time = server_time;

        if mask & CM_ANGLE0 != 0 {
            cmd.angles[0] = r.read_i16()? ^ k as i16;
        }
        if mask & CM_ANGLE1 != 0 {
            cmd.angles[1] = r.read_i16()? ^ (k >> 8) as i16;
        }
        if mask & CM_ANGLE2 != 0 {
            cmd.angles[2] = r.read_i16()? ^ (k >> 16) as i16;
        }
        if mask & CM_FORWARD != 0 {
            cmd.forwardmove = (r.read_u8()? ^ k as u8) as i8;
        }
        if mask & CM_RIGHT != 0 {
            cmd.rightmove = (r.read_u8()? ^ (k >> 8) as u8) as i8;
        }
        if mask & CM_UP != 0 {
            cmd.upmove = (r.read_u8()? ^ (k >> 16) as u8) as i8;
        }
        if mask & CM_BUTTONS != 0 {
            cmd.buttons = r.read_u8()? ^ (k >> 24) as u8;
        }
        if mask & CM_WBUTTONS != 0 {
            cmd.wbuttons = r.read_u8()? ^ k as u8;
        }
        if mask & CM_WEAPON != 0 {
            cmd.weapon = r.read_u8()? ^ (k >> 8) as u8;
        }
        Ok(cmd)
    }
}
