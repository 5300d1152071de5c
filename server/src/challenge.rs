//! Connection gate: challenge handshake and temporary address bans.
//! Both tables are fixed size so a flood of addresses can only recycle
//! entries, never grow server memory.

use std::net::{IpAddr, SocketAddr};

use rand::Rng;
use shared::{MAX_CHALLENGES, MAX_TEMPBAN_ADDRESSES};

#[derive(Debug, Clone, Copy)]
pub struct Challenge {
    pub addr: SocketAddr,
    pub token: i32,
    /// When this address first asked for a challenge.
    pub first_time: i32,
    /// Measured on the first connect and reused on retries.
    pub first_ping: i32,
    pub ping_time: i32,
    /// Last refresh, drives eviction.
    pub time: i32,
    pub connected: bool,
}

/// Fixed-size challenge table with least-recently-seen eviction.
#[derive(Debug)]
pub struct ChallengeTable {
    entries: Vec<Option<Challenge>>,
}

impl ChallengeTable {
    pub fn new() -> Self {
        ChallengeTable {
            entries: vec![None; MAX_CHALLENGES],
        }
    }

    /// Finds or creates a challenge for `addr` and returns its token.
    /// An unconnected entry for the same address is refreshed and its
    /// token reused, so a repeated `getchallenge` is idempotent.
    pub fn issue(&mut self, addr: SocketAddr, now: i32) -> i32 {
        let mut oldest = 0;
        let mut oldest_time = i32::MAX;
        let mut existing = None;

        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                Some(c) if !c.connected && c.addr == addr => {
                    existing = Some(i);
                    break;
                }
                Some(c) => {
                    if c.time < oldest_time {
                        oldest_time = c.time;
                        oldest = i;
                    }
                }
                None => {
                    if oldest_time != i32::MIN {
                        oldest_time = i32::MIN;
                        oldest = i;
                    }
                }
            }
        }

        if let Some(i) = existing {
            if let Some(Some(c)) = self.entries.get_mut(i) {
                c.time = now;
                // the ping window restarts with every response we send
                c.ping_time = now;
                return c.token;
            }
        }

        let mut rng = rand::thread_rng();
        let token = ((rng.gen::<i32>() << 16) ^ rng.gen::<i32>()) ^ now;
        self.entries[oldest] = Some(Challenge {
            addr,
            token,
            first_time: now,
            first_ping: 0,
            ping_time: now,
            time: now,
            connected: false,
        });
        token
    }

    /// Looks up the entry whose address and token both match.
    pub fn find_mut(&mut self, addr: SocketAddr, token: i32) -> Option<&mut Challenge> {
        self.entries
            .iter_mut()
            .flatten()
            .find(|c| c.addr == addr && c.token == token)
    }

    /// Clears the connected flag for `addr` when the client leaves.
    pub fn mark_disconnected(&mut self, addr: SocketAddr) {
        if let Some(c) = self.entries.iter_mut().flatten().find(|c| c.addr == addr) {
            c.connected = false;
        }
    }
}

impl Default for ChallengeTable {
    fn default() -> Self {
        ChallengeTable::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct TempBan {
    ip: IpAddr,
    end_time: i32,
}

/// Fixed-size temporary ban list keyed by IP address.
#[derive(Debug)]
pub struct TempBanTable {
    entries: Vec<Option<TempBan>>,
}

impl TempBanTable {
    pub fn new() -> Self {
        TempBanTable {
            entries: vec![None; MAX_TEMPBAN_ADDRESSES],
        }
    }

    /// Bans `ip` for `length_secs`. Uses the first free or expired slot,
    /// otherwise replaces the ban closest to expiring.
    pub fn ban(&mut self, ip: IpAddr, length_secs: i32, now: i32) {
        let end_time = now + length_secs * 1000;
        let mut soonest = 0;
        let mut soonest_time = i32::MAX;

        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                None => {
                    self.entries[i] = Some(TempBan { ip, end_time });
                    return;
                }
                Some(b) if b.end_time < now => {
                    self.entries[i] = Some(TempBan { ip, end_time });
                    return;
                }
                Some(b) => {
                    if b.end_time < soonest_time {
                        soonest_time = b.end_time;
                        soonest = i;
                    }
                }
            }
        }

        self.entries[soonest] = Some(TempBan { ip, end_time });
    }

    pub fn is_banned(&self, ip: IpAddr, now: i32) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|b| b.end_time > now && b.ip == ip)
    }
}

impl Default for TempBanTable {
    fn default() -> Self {
        TempBanTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(n: u8, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, n), port))
    }

    #[test]
    fn repeated_getchallenge_reuses_token() {
        let mut table = ChallengeTable::new();
        let a = addr(1, 27960);
        let t1 = table.issue(a, 100);
        let t2 = table.issue(a, 200);
        assert_eq!(t1, t2);
    }

    /// A retried getchallenge restarts the ping measurement, so the
    /// first ping is taken from the response the client actually saw.
    #[test]
    fn reissued_challenge_refreshes_ping_stamp() {
        let mut table = ChallengeTable::new();
        let a = addr(1, 27960);
        let token = table.issue(a, 100);
        table.issue(a, 5000);
        let c = table.find_mut(a, token).unwrap();
        assert_eq!(c.ping_time, 5000);
        assert_eq!(c.first_time, 100);
    }

    #[test]
    fn connected_entry_is_not_reused() {
        let mut table = ChallengeTable::new();
        let a = addr(1, 27960);
        let t1 = table.issue(a, 100);
        table.find_mut(a, t1).unwrap().connected = true;
        let t2 = table.issue(a, 200);
        assert_ne!(t1, t2);
    }

    #[test]
    fn full_table_evicts_least_recently_seen() {
        let mut table = ChallengeTable::new();
        // two requests per address exhaust the table quickly with ports
        for i in 0..MAX_CHALLENGES {
            table.issue(addr((i % 250) as u8, 20000 + i as u16), i as i32 + 10);
        }
        let victim = addr(0, 20000);
        let original = table
            .entries
            .iter()
            .flatten()
            .find(|c| c.addr == victim)
            .map(|c| c.token);
        assert!(original.is_some());

        // table is full; the oldest entry (time 10) gets evicted
        table.issue(addr(251, 1), 99999);
        let survived = table.entries.iter().flatten().any(|c| c.addr == victim);
        assert!(!survived);
    }

    #[test]
    fn tempban_expires() {
        let mut bans = TempBanTable::new();
        let ip = addr(5, 0).ip();
        bans.ban(ip, 10, 1000);
        assert!(bans.is_banned(ip, 5000));
        assert!(!bans.is_banned(ip, 12000));
    }

    #[test]
    fn full_ban_table_replaces_soonest_expiring() {
        let mut bans = TempBanTable::new();
        for i in 0..MAX_TEMPBAN_ADDRESSES {
            // increasing expiries; index 0 expires soonest
            bans.ban(addr(i as u8, 0).ip(), 100 + i as i32, 0);
        }
        let soonest = addr(0, 0).ip();
        assert!(bans.is_banned(soonest, 1000));

        bans.ban(addr(200, 0).ip(), 500, 0);
        assert!(!bans.is_banned(soonest, 1000));
        assert!(bans.is_banned(addr(200, 0).ip(), 1000));
    }
}
