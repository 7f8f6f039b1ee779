use rand::rngs::OsRng;
use rustyguard_crypto::{HasMac, StaticInitiatorConfig, StaticPeerConfig};
use rustyguard_types::HandshakeInit;
use x25519_dalek::StaticSecret;
use zerocopy::FromZeroes;

fn main() {
    divan::main();
}

#[divan::bench]
fn verify_mac1(bencher: divan::Bencher) {
    let initiator = StaticInitiatorConfig::new(StaticSecret::random_from_rng(OsRng));
    let peer = StaticPeerConfig::new(initiator.public_key, None);
    let mut msg = HandshakeInit::new_zeroed();
    msg.mac1 = msg.compute_mac1(&peer.mac1_key);

    bencher.bench_local(|| msg.verify_mac1(&peer.mac1_key).unwrap());
}

#[divan::bench]
fn compute_mac1(bencher: divan::Bencher) {
    let initiator = StaticInitiatorConfig::new(StaticSecret::random_from_rng(OsRng));
    let peer = StaticPeerConfig::new(initiator.public_key, None);
    let msg = HandshakeInit::new_zeroed();

    bencher.bench_local(|| msg.compute_mac1(&peer.mac1_key));
}
