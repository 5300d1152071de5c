//! Per-client message building: the full gamestate, regular snapshots
//! and the per-tick send pass that paces them by client rate settings.

use log::{debug, info};

use crate::download;
use crate::network::Server;
use crate::session::ClientState;
use shared::msg::MsgWriter;
use shared::ServerOp;

impl Server {
    /// Sends the complete state of the server to a loading client.
    /// Moves the client to Primed; it will not get snapshots until its
    /// first valid movement command arrives.
    pub(crate) fn send_client_gamestate(&mut self, slot: usize) {
        info!("sending gamestate to client {}", self.clients[slot].name);
        debug!(
            "Going from CS_CONNECTED to CS_PRIMED for {}",
            self.clients[slot].name
        );

        let cl = &mut self.clients[slot];
        cl.state = ClientState::Primed;
        // any pure validation from a previous map is void now
        cl.pure_authentic = false;
        cl.got_cp = false;
        // anything the client notices after this message must be
        // retransmitted with the next gamestate
        cl.gamestate_message_num = cl.outgoing_sequence;

        let mut w = MsgWriter::new();
        w.write_i32(cl.outgoing_sequence);
        w.write_i32(cl.last_client_command);

        cl.write_pending_reliable(&mut w);

        w.write_u8(ServerOp::Gamestate as u8);
        w.write_i32(cl.reliable_sequence);

        for (i, cs) in self.configstrings.iter().enumerate() {
            if cs.is_empty() {
                continue;
            }
            w.write_u8(ServerOp::Configstring as u8);
            w.write_i16(i as i16);
            w.write_string(cs);
        }

        w.write_u8(ServerOp::Baseline as u8);
        let state = self.game.player_state(slot).clone();
        let encoded = bincode::serialize(&state).unwrap_or_default();
        w.write_u16(encoded.len() as u16);
        w.write_data(&encoded);

        w.write_u8(ServerOp::Eof as u8);

        w.write_i32(slot as i32);
        w.write_i32(self.checksum_feed);

        let cl = &mut self.clients[slot];
        cl.outgoing_sequence += 1;
        if let Some(addr) = cl.addr {
            self.queue_datagram(addr, w.into_bytes());
        }
    }

    /// Sends one snapshot: pending reliable commands plus the current
    /// player state.
    pub(crate) fn send_client_snapshot(&mut self, slot: usize) {
        let state = self.game.player_state(slot).clone();
        let encoded = bincode::serialize(&state).unwrap_or_default();

        let cl = &mut self.clients[slot];
        let mut w = MsgWriter::new();
        w.write_i32(cl.outgoing_sequence);
        w.write_i32(cl.last_client_command);

        cl.write_pending_reliable(&mut w);

        w.write_u8(ServerOp::Snapshot as u8);
        w.write_i32(self.time);
        w.write_i32(cl.delta_message);
        w.write_u8(cl.ping.clamp(0, 255) as u8);
        w.write_u16(encoded.len() as u16);
        w.write_data(&encoded);
        w.write_u8(ServerOp::Eof as u8);

        cl.outgoing_sequence += 1;
        if let Some(addr) = cl.addr {
            self.queue_datagram(addr, w.into_bytes());
        }
    }

    /// Called every tick. Each client gets at most one message, paced by
    /// its snaps setting; downloading clients get file blocks instead.
    pub(crate) fn send_client_messages(&mut self) {
        for slot in 0..self.clients.len() {
            let cl = &self.clients[slot];
            if cl.state == ClientState::Free || cl.is_bot {
                continue;
            }
            // zombies still need their disconnect command delivered
            if cl.state == ClientState::Zombie
                && cl.reliable_acknowledge >= cl.reliable_sequence
            {
                continue;
            }
            if self.time < cl.next_snapshot_time {
                continue;
            }

            self.clients[slot].next_snapshot_time = self.time + self.clients[slot].snapshot_msec;

            if !self.clients[slot].download_name.is_empty() && !self.clients[slot].wwwing {
                let mut w = MsgWriter::new();
                {
                    let cl = &mut self.clients[slot];
                    w.write_i32(cl.outgoing_sequence);
                    w.write_i32(cl.last_client_command);
                    cl.write_pending_reliable(&mut w);
                }
                let result = download::write_download(
                    slot,
                    &mut self.clients[slot],
                    &self.config,
                    self.time,
                    &mut w,
                );
                match result {
                    Ok(()) => {
                        w.write_u8(ServerOp::Eof as u8);
                        let cl = &mut self.clients[slot];
                        cl.outgoing_sequence += 1;
                        if let Some(addr) = cl.addr {
                            self.queue_datagram(addr, w.into_bytes());
                        }
                    }
                    Err(reason) => self.drop_client(slot, &reason),
                }
                continue;
            }

            self.send_client_snapshot(slot);
        }
    }
}
