//! Randomized outbound identities for the sentinel response.
//!
//! Requests without a `url` are probes rather than proxy traffic. They are
//! answered with a throwaway identity so the probe learns nothing stable
//! about the proxy.

use std::net::{IpAddr, Ipv4Addr};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::security::VIA_SIGNATURE;

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// A made-up client identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub forwarded_for: IpAddr,
    pub user_agent: String,
    pub via: String,
}

/// Source of sentinel identities.
pub trait IdentityGenerator: Send + Sync {
    fn generate(&self) -> Identity;
}

/// Identity generator backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentity;

impl RandomIdentity {
    fn random_public_ipv4<R: Rng>(rng: &mut R) -> Ipv4Addr {
        loop {
            let ip = Ipv4Addr::new(rng.gen_range(1..=223), rng.gen(), rng.gen(), rng.gen_range(1..=254));
            if !(ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_documentation()) {
                return ip;
            }
        }
    }
}

impl IdentityGenerator for RandomIdentity {
    fn generate(&self) -> Identity {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string();
        Identity {
            forwarded_for: IpAddr::V4(Self::random_public_ipv4(&mut rng)),
            user_agent,
            via: format!("{}-{}", VIA_SIGNATURE, rng.gen_range(0..1000)),
        }
    }
}
