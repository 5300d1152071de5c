//! Server configuration. Everything an operator can tune lives in
//! [`ServerConfig`], fixed for the lifetime of a map. The few values the
//! console flips at runtime live in [`ServerVars`].

use std::path::PathBuf;

/// Pure pak enforcement level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PureMode {
    /// No pak validation at all.
    Off,
    /// Failed validation is announced but the client stays.
    Lenient,
    /// Failed validation drops the client after one last snapshot.
    Strict,
}

/// Match phase, broadcast to clients through the config layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Initialize,
    Playing,
    WarmupCountdown,
    Warmup,
    Intermission,
    WaitingForPlayers,
    Reset,
}

impl GamePhase {
    pub fn from_i32(v: i32) -> Option<GamePhase> {
        match v {
            -1 => Some(GamePhase::Initialize),
            0 => Some(GamePhase::Playing),
            1 => Some(GamePhase::WarmupCountdown),
            2 => Some(GamePhase::Warmup),
            3 => Some(GamePhase::Intermission),
            4 => Some(GamePhase::WaitingForPlayers),
            5 => Some(GamePhase::Reset),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            GamePhase::Initialize => -1,
            GamePhase::Playing => 0,
            GamePhase::WarmupCountdown => 1,
            GamePhase::Warmup => 2,
            GamePhase::Intermission => 3,
            GamePhase::WaitingForPlayers => 4,
            GamePhase::Reset => 5,
        }
    }
}

/// Operator-tunable server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub max_clients: usize,
    /// Slots reserved for clients presenting `private_password`.
    pub private_clients: usize,
    pub private_password: String,
    pub tick_msec: i32,

    /// Seconds a reconnecting address must wait between attempts.
    pub reconnect_limit_secs: i32,
    /// Seconds without a packet before a live client is dropped.
    pub timeout_secs: i32,
    /// Seconds a zombie slot lingers before becoming free.
    pub zombie_secs: i32,
    /// Ping bands for non-LAN connects, 0 disables a band.
    pub min_ping_ms: i32,
    pub max_ping_ms: i32,
    /// LAN clients skip the rate choke when set.
    pub lan_force_rate: bool,

    pub flood_protect: bool,

    pub allow_download: bool,
    /// Per-client download rate cap in bytes per second.
    pub download_max_rate: i32,
    pub www_download: bool,
    pub www_base_url: String,
    pub www_dl_disconnected: bool,
    pub www_fallback_url: String,

    pub pure_mode: PureMode,
    /// Pure checksums of the paks the server has loaded.
    pub pak_checksums: Vec<i32>,
    /// Pak file names the server can serve, relative to `fs_base`.
    pub pak_names: Vec<String>,
    /// Paks clients must already own and may never auto-download.
    pub official_paks: Vec<String>,
    /// Checksums of the paks holding the two client game modules.
    pub module_checksums: [i32; 2],

    /// 0 = off, 1..=4 pick a slot-number name format.
    pub numbered_names: u8,
    /// "prefix;suffix" wrapped around the slot number.
    pub numbered_names_decoration: String,

    pub allow_listmaps: bool,
    pub map_names: Vec<String>,
    pub unlisted_maps: Vec<String>,

    /// Voice chats relayed per 30 second window, 0 disables relay.
    pub voice_chats_per_window: i32,
    /// Enables the save/load client commands.
    pub allow_save: bool,

    /// Empty disables remote console access.
    pub rcon_password: String,
    pub tempban_message: String,
    pub full_message: String,
    pub first_message: String,

    /// Root directory for pak files and savegames.
    pub fs_base: PathBuf,
    /// Master server for heartbeats, when set.
    pub master_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            hostname: "noname".to_string(),
            max_clients: 20,
            private_clients: 0,
            private_password: String::new(),
            tick_msec: 50,
            reconnect_limit_secs: 3,
            timeout_secs: 240,
            zombie_secs: 2,
            min_ping_ms: 0,
            max_ping_ms: 0,
            lan_force_rate: true,
            flood_protect: true,
            allow_download: true,
            download_max_rate: 42000,
            www_download: false,
            www_base_url: String::new(),
            www_dl_disconnected: false,
            www_fallback_url: String::new(),
            pure_mode: PureMode::Off,
            pak_checksums: Vec::new(),
            pak_names: Vec::new(),
            official_paks: Vec::new(),
            module_checksums: [0, 0],
            numbered_names: 0,
            numbered_names_decoration: String::new(),
            allow_listmaps: true,
            map_names: Vec::new(),
            unlisted_maps: Vec::new(),
            voice_chats_per_window: 1,
            allow_save: false,
            rcon_password: String::new(),
            tempban_message: "You have been kicked and are temporarily banned.".to_string(),
            full_message: "Server is full.".to_string(),
            first_message: String::new(),
            fs_base: PathBuf::from("."),
            master_address: None,
        }
    }
}

/// Runtime-mutable server state the console can touch.
#[derive(Debug, Clone)]
pub struct ServerVars {
    pub cheats: bool,
    pub phase: GamePhase,
    pub restarting: bool,
    pub savegame_loading: bool,
    pub savegame_filename: String,
    /// Output slot for console "get" accessors.
    pub return_value: String,
}

impl Default for ServerVars {
    fn default() -> Self {
        ServerVars {
            cheats: false,
            phase: GamePhase::Initialize,
            restarting: false,
            savegame_loading: false,
            savegame_filename: String::new(),
            return_value: String::new(),
        }
    }
}

/// Applies the phase-machine rules to a requested transition. Returns the
/// phase actually entered, or `None` when the transition is rejected.
pub fn transition_phase(old: GamePhase, requested: GamePhase) -> Option<GamePhase> {
    // matches always pass through a warmup after intermission
    let mut new = requested;
    if old == GamePhase::Intermission && new == GamePhase::Playing {
        new = GamePhase::Warmup;
    }

    if old == new && new != GamePhase::Playing {
        return None;
    }
    if old == GamePhase::WaitingForPlayers && new != GamePhase::Warmup {
        return None;
    }
    if old == GamePhase::Intermission && new != GamePhase::Warmup {
        return None;
    }
    if old == GamePhase::Reset && new != GamePhase::WaitingForPlayers && new != GamePhase::Warmup {
        return None;
    }

    if new == GamePhase::Reset {
        new = GamePhase::Warmup;
    }
    Some(new)
}
