use rand::rngs::OsRng;
use rustyguard_crypto::{create_cookie_reply, open_cookie_reply, CookieState};
use x25519_dalek::{PublicKey, StaticSecret};

fn main() {
    divan::main();
}

#[divan::bench]
fn new_cookie(bencher: divan::Bencher) {
    let mut state = CookieState::default();
    state.generate(&mut OsRng);
    let addr = "198.51.100.1:51820".parse().unwrap();

    bencher.bench_local(|| state.new_cookie(addr));
}

#[divan::bench]
fn cookie_reply_round_trip(bencher: divan::Bencher) {
    let sk = StaticSecret::random_from_rng(OsRng);
    let pk = PublicKey::from(&sk);
    let cookie_key = rustyguard_crypto::StaticPeerConfig::new(pk, None).cookie_key;
    let mut state = CookieState::default();
    state.generate(&mut OsRng);
    let addr = "198.51.100.1:51820".parse().unwrap();
    let cookie = state.new_cookie(addr);
    let mac1 = [0u8; 16];

    bencher.bench_local(|| {
        let reply = create_cookie_reply(1, cookie, &cookie_key, &mac1, &mut OsRng);
        open_cookie_reply(&reply, &cookie_key, &mac1).unwrap()
    });
}
