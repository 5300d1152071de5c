//! Integration tests for the server core
//!
//! These tests drive the server through real wire-format packets: the
//! out-of-band handshake, gamestate delivery, movement batches, the file
//! download conversation and the operator console.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use server::config::{PureMode, ServerConfig};
use server::game::BaselineGame;
use server::network::Server;
use server::session::ClientState;
use shared::msg::{MsgReader, MsgWriter};
use shared::usercmd::{command_hash, UserCmd};
use shared::{ClientOp, ServerOp, OOB_MARKER, PROTOCOL_VERSION};

// HELPER FUNCTIONS

/// Creates an on-disk game directory with one loadable map.
fn test_base(tag: &str) -> PathBuf {
    let base = std::env::temp_dir().join(format!("server-test-{}-{}", tag, std::process::id()));
    fs::create_dir_all(base.join("maps")).unwrap();
    fs::write(base.join("maps/depot.bsp"), b"not a real bsp").unwrap();
    base
}

fn test_config(base: PathBuf) -> ServerConfig {
    ServerConfig {
        max_clients: 8,
        fs_base: base,
        ..ServerConfig::default()
    }
}

async fn test_server(config: ServerConfig) -> Server {
    let game = Box::new(BaselineGame::new(config.max_clients));
    let mut server = Server::new("127.0.0.1:0", config, game)
        .await
        .expect("Failed to bind test server");
    // move off time zero before loading the map so a fresh client's
    // zeroed server id is recognizably stale
    server.tick();
    let output = server.console_command("map depot");
    assert_eq!(output, "", "map load failed: {}", output);
    server.take_outbound();
    server
}

fn oob(line: &str) -> Vec<u8> {
    let mut data = OOB_MARKER.to_vec();
    data.extend_from_slice(line.as_bytes());
    data
}

fn oob_text(data: &[u8]) -> String {
    assert_eq!(&data[..4], &OOB_MARKER);
    String::from_utf8_lossy(&data[4..]).into_owned()
}

/// What a client has learned from the connection so far.
struct ClientView {
    addr: SocketAddr,
    qport: u16,
    slot: usize,
    server_id: i32,
    message_acknowledge: i32,
    reliable_acknowledge: i32,
    last_reliable_command: String,
    checksum_feed: i32,
    command_sequence: i32,
}

/// Runs the challenge and connect handshake from a remote (LAN) address.
fn connect_client(server: &mut Server, addr: SocketAddr, qport: u16, name: &str) -> usize {
    server.handle_datagram(&oob("getchallenge"), addr);
    let replies = server.take_outbound();
    let text = oob_text(&replies.last().expect("no challenge reply").1);
    let token: i32 = text
        .trim()
        .strip_prefix("challengeResponse ")
        .expect("unexpected challenge reply")
        .parse()
        .unwrap();

    let userinfo = format!(
        "\\protocol\\{}\\qport\\{}\\challenge\\{}\\name\\{}\\rate\\25000\\snaps\\20",
        PROTOCOL_VERSION, qport, token, name
    );
    server.handle_datagram(&oob(&format!("connect \"{}\"", userinfo)), addr);
    let replies = server.take_outbound();
    assert!(
        replies.iter().any(|(_, d)| oob_text(d).starts_with("connectResponse")),
        "expected connectResponse, got {:?}",
        replies.iter().map(|(_, d)| oob_text(d)).collect::<Vec<_>>()
    );

    (0..8)
        .find(|&i| server.client(i).qport == qport && server.client(i).is_connected())
        .expect("no slot assigned")
}

fn session_header(view: &ClientView, w: &mut MsgWriter) {
    w.write_u16(view.qport);
    w.write_i32(view.server_id);
    w.write_i32(view.message_acknowledge);
    w.write_i32(view.reliable_acknowledge);
}

/// Sends an empty in-session packet, which prompts the gamestate, and
/// parses the reply into the client's view of the connection.
fn receive_gamestate(server: &mut Server, addr: SocketAddr, qport: u16, slot: usize) -> ClientView {
    let mut w = MsgWriter::new();
    w.write_u16(qport);
    w.write_i32(0); // stale server id
    w.write_i32(0);
    w.write_i32(0);
    w.write_u8(ClientOp::Eof as u8);
    server.handle_datagram(&w.into_bytes(), addr);

    let replies = server.take_outbound();
    let (_, data) = replies
        .iter()
        .find(|(a, _)| *a == addr)
        .expect("no gamestate sent");

    let mut r = MsgReader::new(data);
    let sequence = r.read_i32().unwrap();
    let _last_command = r.read_i32().unwrap();

    let mut reliable_acknowledge = 0;
    let mut last_reliable_command = String::new();
    let mut systeminfo = String::new();
    loop {
        match ServerOp::from_u8(r.read_u8().unwrap()).unwrap() {
            ServerOp::ServerCommand => {
                reliable_acknowledge = r.read_i32().unwrap();
                last_reliable_command = r.read_string().unwrap();
            }
            ServerOp::Gamestate => {
                let _reliable_sequence = r.read_i32().unwrap();
            }
            ServerOp::Configstring => {
                let index = r.read_i16().unwrap();
                let value = r.read_string().unwrap();
                if index as usize == shared::CS_SYSTEMINFO {
                    systeminfo = value;
                }
            }
            ServerOp::Baseline => {
                let len = r.read_u16().unwrap() as usize;
                r.read_data(len).unwrap();
            }
            ServerOp::Eof => break,
            other => panic!("unexpected gamestate record {:?}", other),
        }
    }
    let wire_slot = r.read_i32().unwrap();
    let checksum_feed = r.read_i32().unwrap();
    assert_eq!(wire_slot as usize, slot);

    let server_id: i32 = shared::info::value_for_key(&systeminfo, "sv_serverid")
        .parse()
        .expect("systeminfo missing sv_serverid");

    ClientView {
        addr,
        qport,
        slot,
        server_id,
        message_acknowledge: sequence,
        reliable_acknowledge,
        last_reliable_command,
        checksum_feed,
        command_sequence: 0,
    }
}

/// Full handshake up to Primed.
fn prime_client(server: &mut Server, addr: SocketAddr, qport: u16, name: &str) -> ClientView {
    let slot = connect_client(server, addr, qport, name);
    assert_eq!(server.client(slot).state, ClientState::Connected);
    let view = receive_gamestate(server, addr, qport, slot);
    assert_eq!(server.client(slot).state, ClientState::Primed);
    view
}

fn move_key(view: &ClientView) -> u32 {
    (view.checksum_feed ^ view.message_acknowledge) as u32
        ^ command_hash(&view.last_reliable_command)
}

fn send_move(server: &mut Server, view: &ClientView, cmd: UserCmd) {
    let mut w = MsgWriter::new();
    session_header(view, &mut w);
    w.write_u8(ClientOp::MoveNoDelta as u8);
    w.write_u8(1);
    cmd.write_delta(&mut w, &UserCmd::default(), move_key(view));
    w.write_u8(ClientOp::Eof as u8);
    server.handle_datagram(&w.into_bytes(), view.addr);
}

fn send_command(server: &mut Server, view: &mut ClientView, text: &str) {
    view.command_sequence += 1;
    let mut w = MsgWriter::new();
    session_header(view, &mut w);
    w.write_u8(ClientOp::ClientCommand as u8);
    w.write_i32(view.command_sequence);
    w.write_string(text);
    w.write_u8(ClientOp::Eof as u8);
    server.handle_datagram(&w.into_bytes(), view.addr);
}

/// Handshake all the way into the world.
fn activate_client(server: &mut Server, addr: SocketAddr, qport: u16, name: &str) -> ClientView {
    let view = prime_client(server, addr, qport, name);
    let cmd = UserCmd {
        server_time: 100,
        ..UserCmd::default()
    };
    send_move(server, &view, cmd);
    assert_eq!(server.client(view.slot).state, ClientState::Active);
    view
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Walks one client through challenge, connect, gamestate and the
    /// first movement command.
    #[tokio::test]
    async fn full_connection_lifecycle() {
        let mut server = test_server(test_config(test_base("lifecycle"))).await;
        let addr: SocketAddr = "192.168.1.5:27961".parse().unwrap();

        let view = activate_client(&mut server, addr, 4711, "tester");

        let cl = server.client(view.slot);
        assert_eq!(cl.state, ClientState::Active);
        assert_eq!(cl.name, "tester");
        assert_eq!(cl.last_usercmd.server_time, 100);
        // LAN clients are exempt from rate limiting
        assert_eq!(cl.rate, 99999);
        assert_eq!(cl.snapshot_msec, 50);
    }

    /// Protocol mismatches are refused before any slot is taken.
    #[tokio::test]
    async fn wrong_protocol_is_refused() {
        let mut server = test_server(test_config(test_base("protocol"))).await;
        let addr: SocketAddr = "192.168.1.6:27961".parse().unwrap();

        let userinfo = "\\protocol\\1\\qport\\100\\challenge\\0\\name\\old";
        server.handle_datagram(&oob(&format!("connect \"{}\"", userinfo)), addr);

        let replies = server.take_outbound();
        assert!(oob_text(&replies[0].1).contains("[err_prot]"));
        assert!((0..8).all(|i| !server.client(i).is_connected()));
    }

    /// Remote clients cannot skip the challenge handshake.
    #[tokio::test]
    async fn connect_without_challenge_is_refused() {
        let mut server = test_server(test_config(test_base("nochal"))).await;
        let addr: SocketAddr = "192.168.1.7:27961".parse().unwrap();

        let userinfo = format!(
            "\\protocol\\{}\\qport\\100\\challenge\\12345\\name\\sneaky",
            PROTOCOL_VERSION
        );
        server.handle_datagram(&oob(&format!("connect \"{}\"", userinfo)), addr);

        let replies = server.take_outbound();
        assert!(oob_text(&replies[0].1).contains("No or bad challenge"));
    }

    /// A client that stops sending packets is dropped, lingers as a
    /// zombie, and finally frees its slot.
    #[tokio::test]
    async fn silent_client_times_out() {
        let mut config = test_config(test_base("timeout"));
        config.timeout_secs = 1;
        config.zombie_secs = 1;
        let mut server = test_server(config).await;
        let addr: SocketAddr = "192.168.1.8:27961".parse().unwrap();

        let view = activate_client(&mut server, addr, 200, "afk");

        // 1s timeout + 1s zombie linger at 50ms per tick
        for _ in 0..25 {
            server.tick();
        }
        assert_eq!(server.client(view.slot).state, ClientState::Zombie);
        for _ in 0..25 {
            server.tick();
        }
        assert_eq!(server.client(view.slot).state, ClientState::Free);
    }

    /// The disconnect command retires the slot through the zombie state.
    #[tokio::test]
    async fn disconnect_command_drops_client() {
        let mut server = test_server(test_config(test_base("disco"))).await;
        let addr: SocketAddr = "192.168.1.9:27961".parse().unwrap();

        let mut view = activate_client(&mut server, addr, 300, "leaver");
        send_command(&mut server, &mut view, "disconnect");
        assert_eq!(server.client(view.slot).state, ClientState::Zombie);
    }

    /// A gap in the reliable command sequence is unrecoverable.
    #[tokio::test]
    async fn lost_reliable_commands_drop_client() {
        let mut server = test_server(test_config(test_base("gap"))).await;
        let addr: SocketAddr = "192.168.1.10:27961".parse().unwrap();

        let mut view = activate_client(&mut server, addr, 400, "lossy");
        view.command_sequence = 5; // sends sequence 6, expecting 1
        send_command(&mut server, &mut view, "say hello");
        assert_eq!(server.client(view.slot).state, ClientState::Zombie);
    }

    /// A throttled command invalidates the remainder of its packet.
    #[tokio::test]
    async fn flood_protection_ignores_rest_of_packet() {
        let mut server = test_server(test_config(test_base("flood"))).await;
        let addr: SocketAddr = "192.168.1.11:27961".parse().unwrap();

        let mut view = activate_client(&mut server, addr, 500, "spammer");

        // two commands in one packet: the second lands inside the flood
        // window, so the trailing disconnect must not execute
        let mut w = MsgWriter::new();
        session_header(&view, &mut w);
        w.write_u8(ClientOp::ClientCommand as u8);
        w.write_i32(view.command_sequence + 1);
        w.write_string("say one");
        w.write_u8(ClientOp::ClientCommand as u8);
        w.write_i32(view.command_sequence + 2);
        w.write_string("disconnect");
        w.write_u8(ClientOp::Eof as u8);
        server.handle_datagram(&w.into_bytes(), addr);
        view.command_sequence += 2;

        assert_eq!(server.client(view.slot).state, ClientState::Active);

        // after the window passes the same command goes through
        for _ in 0..20 {
            server.tick();
        }
        send_command(&mut server, &mut view, "disconnect");
        assert_eq!(server.client(view.slot).state, ClientState::Zombie);
    }
}

/// DOWNLOAD PROTOCOL TESTS
mod download_tests {
    use super::*;

    /// A connected client asking for a served pak gets block zero with
    /// the total size on the next message.
    #[tokio::test]
    async fn download_starts_with_sized_block_zero() {
        let base = test_base("dl");
        fs::create_dir_all(base.join("mp")).unwrap();
        let payload = vec![0x5A; 1500];
        fs::write(base.join("mp/pak7.pk3"), &payload).unwrap();

        let mut config = test_config(base);
        config.pak_names = vec!["mp/pak7.pk3".to_string()];
        let mut server = test_server(config).await;
        let addr: SocketAddr = "192.168.1.20:27961".parse().unwrap();

        let slot = connect_client(&mut server, addr, 600, "getter");
        let mut view = receive_gamestate(&mut server, addr, 600, slot);
        send_command(&mut server, &mut view, "download mp/pak7.pk3");
        server.take_outbound();

        server.tick();
        let replies = server.take_outbound();
        let (_, data) = replies
            .iter()
            .find(|(a, _)| *a == addr)
            .expect("no download message");

        let mut r = MsgReader::new(data);
        r.read_i32().unwrap(); // sequence
        r.read_i32().unwrap(); // last client command
        // skip retransmitted reliable commands
        let mut tag = r.read_u8().unwrap();
        while tag == ServerOp::ServerCommand as u8 {
            r.read_i32().unwrap();
            r.read_string().unwrap();
            tag = r.read_u8().unwrap();
        }
        assert_eq!(tag, ServerOp::Download as u8);
        assert_eq!(r.read_i16().unwrap(), 0);
        assert_eq!(r.read_i32().unwrap(), payload.len() as i32);
        let len = r.read_u16().unwrap() as usize;
        assert_eq!(len, 1024);
        assert_eq!(r.read_data(len).unwrap(), &payload[..1024]);
    }

    /// With downloading disabled the server answers with a refusal
    /// record instead of data.
    #[tokio::test]
    async fn disabled_download_is_refused() {
        let base = test_base("dlref");
        let mut config = test_config(base);
        config.allow_download = false;
        config.pak_names = vec!["mp/pak7.pk3".to_string()];
        let mut server = test_server(config).await;
        let addr: SocketAddr = "192.168.1.21:27961".parse().unwrap();

        let slot = connect_client(&mut server, addr, 700, "denied");
        let mut view = receive_gamestate(&mut server, addr, 700, slot);
        send_command(&mut server, &mut view, "download mp/pak7.pk3");
        server.take_outbound();

        server.tick();
        let replies = server.take_outbound();
        let (_, data) = replies
            .iter()
            .find(|(a, _)| *a == addr)
            .expect("no refusal message");

        let mut r = MsgReader::new(data);
        r.read_i32().unwrap();
        r.read_i32().unwrap();
        let mut tag = r.read_u8().unwrap();
        while tag == ServerOp::ServerCommand as u8 {
            r.read_i32().unwrap();
            r.read_string().unwrap();
            tag = r.read_u8().unwrap();
        }
        assert_eq!(tag, ServerOp::Download as u8);
        assert_eq!(r.read_i16().unwrap(), 0);
        assert_eq!(r.read_i32().unwrap(), -1);
        assert!(r.read_string().unwrap().contains("autodownloading is disabled"));
        // the request is spent; the next message is a plain snapshot
        assert!(server.client(slot).download_name.is_empty());
    }

    /// Requests outside the served pak list drop the client.
    #[tokio::test]
    async fn illegal_download_request_drops_client() {
        let mut server = test_server(test_config(test_base("dlbad"))).await;
        let addr: SocketAddr = "192.168.1.22:27961".parse().unwrap();

        let slot = connect_client(&mut server, addr, 800, "prober");
        let mut view = receive_gamestate(&mut server, addr, 800, slot);
        send_command(&mut server, &mut view, "download ../../etc/passwd");
        server.tick();
        assert_eq!(server.client(slot).state, ClientState::Zombie);
    }
}

/// PURE VALIDATION TESTS
mod pure_tests {
    use super::*;

    /// On a strict pure server a failing pak report disconnects the
    /// client as soon as it arrives, after one last snapshot carrying
    /// the reason.
    #[tokio::test]
    async fn strict_pure_failure_drops_on_report() {
        let mut config = test_config(test_base("purestrict"));
        config.pure_mode = PureMode::Strict;
        config.module_checksums = [111, 222];
        let mut server = test_server(config).await;
        let addr: SocketAddr = "192.168.1.40:27961".parse().unwrap();

        let mut view = prime_client(&mut server, addr, 906, "impure");
        server.take_outbound();

        // wrong module checksums, so the report cannot pass
        let cmd = format!("cp {} 999 998 @ 5 6", view.server_id);
        send_command(&mut server, &mut view, &cmd);

        let cl = server.client(view.slot);
        assert_eq!(cl.state, ClientState::Zombie);
        assert!(cl
            .reliable_command(cl.reliable_sequence)
            .contains("Unpure client detected"));
        // the farewell snapshot went out in the same frame
        assert!(server.take_outbound().iter().any(|(a, _)| *a == addr));
    }

    /// A lenient pure server announces the failure but lets the client
    /// play on.
    #[tokio::test]
    async fn lenient_pure_failure_keeps_client() {
        let mut config = test_config(test_base("purelenient"));
        config.pure_mode = PureMode::Lenient;
        config.module_checksums = [111, 222];
        let mut server = test_server(config).await;
        let addr: SocketAddr = "192.168.1.41:27961".parse().unwrap();

        let mut view = prime_client(&mut server, addr, 907, "modded");
        let cmd = format!("cp {} 999 998 @ 5 6", view.server_id);
        send_command(&mut server, &mut view, &cmd);
        assert_eq!(server.client(view.slot).state, ClientState::Primed);

        let cmd = UserCmd {
            server_time: 100,
            ..UserCmd::default()
        };
        send_move(&mut server, &view, cmd);
        assert_eq!(server.client(view.slot).state, ClientState::Active);
    }
}

/// OPERATOR CONSOLE TESTS
mod console_tests {
    use super::*;

    /// map_restart keeps every active client in the world and changes
    /// the server id so stale packets are recognizable.
    #[tokio::test]
    async fn map_restart_preserves_clients() {
        let mut server = test_server(test_config(test_base("restart"))).await;
        let a1: SocketAddr = "192.168.1.30:27961".parse().unwrap();
        let a2: SocketAddr = "192.168.1.31:27961".parse().unwrap();

        let v1 = activate_client(&mut server, a1, 900, "alpha");
        let v2 = activate_client(&mut server, a2, 901, "bravo");

        server.tick();
        let output = server.console_command("map_restart");
        assert_eq!(output, "");

        for view in [&v1, &v2] {
            let cl = server.client(view.slot);
            assert_eq!(cl.state, ClientState::Active);
            // the restart announcement rides the reliable channel
            assert_eq!(cl.reliable_command(cl.reliable_sequence), "map_restart\n");
        }
    }

    /// Kick by name works on color-coded names.
    #[tokio::test]
    async fn kick_by_name_strips_colors() {
        let mut server = test_server(test_config(test_base("kick"))).await;
        let addr: SocketAddr = "192.168.1.32:27961".parse().unwrap();

        let view = activate_client(&mut server, addr, 902, "^1Red^7Baron");
        let output = server.console_command("kick redbaron");
        assert_eq!(output, "");
        assert_eq!(server.client(view.slot).state, ClientState::Zombie);
    }

    /// status lists connected clients with their slot and name.
    #[tokio::test]
    async fn status_lists_clients() {
        let mut server = test_server(test_config(test_base("status"))).await;
        let addr: SocketAddr = "192.168.1.33:27961".parse().unwrap();

        activate_client(&mut server, addr, 903, "statusguy");
        let output = server.console_command("status");
        assert!(output.contains("map: depot"));
        assert!(output.contains("statusguy"));
        assert!(output.contains("192.168.1.33"));
    }

    /// Script accessors write their result into the returnvalue slot.
    #[tokio::test]
    async fn accessors_publish_return_values() {
        let mut server = test_server(test_config(test_base("access"))).await;
        let addr: SocketAddr = "192.168.1.34:27961".parse().unwrap();

        let view = activate_client(&mut server, addr, 904, "scripted");
        let slot = view.slot;

        server.console_command(&format!("setvelocity {} 1.5 -2 640", slot));
        server.console_command(&format!("getvelocity {}", slot));
        assert_eq!(server.return_value(), "1.5 -2 640");

        server.console_command(&format!("weaponset {} 7", slot));
        server.console_command(&format!("weaponcheck {} 7", slot));
        assert_eq!(server.return_value(), "1");
        server.console_command(&format!("weaponremove {} 7", slot));
        server.console_command(&format!("weaponcheck {} 7", slot));
        assert_eq!(server.return_value(), "0");

        server.console_command(&format!("setclassweapontime {} 12500", slot));
        server.console_command(&format!("getclassweapontime {}", slot));
        assert_eq!(server.return_value(), "12500");

        server.console_command(&format!("getclstate {}", slot));
        assert_eq!(server.return_value(), "4"); // active
    }

    /// Invalid phase transitions are rejected with the current phase kept.
    #[tokio::test]
    async fn gamestate_transitions_follow_rules() {
        let mut server = test_server(test_config(test_base("phase"))).await;

        // a running map is in the playing phase
        assert_eq!(server.console_command("gamestate"), "gamestate is 0\n");

        // playing -> intermission is allowed
        assert_eq!(server.console_command("gamestate 3"), "");
        // intermission -> playing is rerouted to warmup
        assert_eq!(server.console_command("gamestate 0"), "");
        assert_eq!(server.console_command("gamestate"), "gamestate is 2\n");

        // repeating a non-playing phase is rejected
        let output = server.console_command("gamestate 2");
        assert!(output.contains("Invalid gamestate transition"));
    }

    /// Temp bans survive the kick and block the next handshake.
    #[tokio::test]
    async fn tempban_blocks_reconnect() {
        let mut server = test_server(test_config(test_base("ban"))).await;
        let addr: SocketAddr = "192.168.1.35:27961".parse().unwrap();

        let view = activate_client(&mut server, addr, 905, "griefer");
        server.console_command(&format!("tempbanclient {} 60", view.slot));
        assert_eq!(server.client(view.slot).state, ClientState::Zombie);
        server.take_outbound();

        server.handle_datagram(&oob("getchallenge"), addr);
        let replies = server.take_outbound();
        let text = oob_text(&replies.last().unwrap().1);
        assert!(text.contains("temporarily banned"));
    }
}
