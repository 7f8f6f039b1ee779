use rand::rngs::OsRng;
use rustyguard_crypto::{
    decrypt_handshake_init, decrypt_handshake_resp, encrypt_handshake_init, encrypt_handshake_resp,
    generate_ephemeral, HandshakeState, StaticInitiatorConfig, StaticPeerConfig,
};
use tai64::Tai64N;
use x25519_dalek::{PublicKey, StaticSecret};

fn main() {
    divan::main();
}

#[divan::bench]
fn create_initiation(bencher: divan::Bencher) {
    let initiator = StaticInitiatorConfig::new(StaticSecret::random_from_rng(OsRng));
    let responder_sk = StaticSecret::random_from_rng(OsRng);
    let peer = StaticPeerConfig::new(PublicKey::from(&responder_sk), None);

    bencher.bench_local(|| {
        let mut hs = HandshakeState::default();
        let esk = generate_ephemeral(&mut OsRng);
        encrypt_handshake_init(&mut hs, &initiator, &peer, &esk, Tai64N::now(), 1, None)
    });
}

#[divan::bench]
fn full_handshake(bencher: divan::Bencher) {
    let init_sk = StaticSecret::random_from_rng(OsRng);
    let resp_sk = StaticSecret::random_from_rng(OsRng);
    let initiator = StaticInitiatorConfig::new(init_sk);
    let responder = StaticInitiatorConfig::new(resp_sk);
    let peer_of_responder = StaticPeerConfig::new(responder.public_key, None);
    let peer_of_initiator = StaticPeerConfig::new(initiator.public_key, None);

    bencher.bench_local(|| {
        let mut hs_i = HandshakeState::default();
        let esk_i = generate_ephemeral(&mut OsRng);
        let msg1 = encrypt_handshake_init(
            &mut hs_i,
            &initiator,
            &peer_of_responder,
            &esk_i,
            Tai64N::now(),
            1,
            None,
        );

        let mut hs_r = HandshakeState::default();
        let decrypted = decrypt_handshake_init(&msg1, &mut hs_r, &responder).unwrap();

        let esk_r = generate_ephemeral(&mut OsRng);
        let msg2 =
            encrypt_handshake_resp(&mut hs_r, &decrypted, &esk_r, &peer_of_initiator, 2, None);

        decrypt_handshake_resp(&msg2, &mut hs_i, &initiator, &peer_of_responder, &esk_i).unwrap();
    });
}
