//! Magnet URI helpers

use url::Url;

use super::error::ExtractionError;

/// Public trackers appended to magnets built from a bare info hash
pub const PUBLIC_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://9.rarbg.com:2810/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
    "http://tracker.openbittorrent.com:80/announce",
    "udp://opentracker.i2p.rocks:6969/announce",
    "https://opentracker.i2p.rocks:443/announce",
    "udp://www.peckservers.com:9000/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://tracker.tiny-vps.com:6969/announce",
    "udp://tracker.moeking.me:6969/announce",
    "udp://tracker.dler.org:6969/announce",
    "udp://tracker.altrosky.nl:6969/announce",
    "udp://p4p.arenabg.com:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://ipv4.tracker.harry.lu:80/announce",
    "udp://explodie.org:6969/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://bt1.archive.org:6969/announce",
    "https://tracker.lilithraws.org:443/announce",
];

/// Build a v1 magnet for a 40 character hex info hash
pub fn build_public_magnet_link(info_hash: &str, title: &str) -> Result<String, ExtractionError> {
    let hash = info_hash.trim();
    if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ExtractionError::new(
            "infohash",
            format!("'{}' is not a 40 character hex info hash", info_hash),
        ));
    }

    let mut magnet = format!(
        "magnet:?xt=urn:btih:{}&dn={}",
        hash.to_ascii_uppercase(),
        urlencoding::encode(title)
    );
    for tracker in PUBLIC_TRACKERS {
        magnet.push_str("&tr=");
        magnet.push_str(&urlencoding::encode(tracker));
    }
    Ok(magnet)
}

/// Info hash from the `xt` argument of a magnet, `None` when malformed
pub fn info_hash_from_magnet(magnet: &str) -> Option<String> {
    let url = Url::parse(magnet.trim()).ok()?;
    if url.scheme() != "magnet" {
        return None;
    }
    let xt = url
        .query_pairs()
        .find(|(k, _)| k == "xt")
        .map(|(_, v)| v.into_owned())?;
    let hash = xt.rsplit(':').next()?.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}
