use std::net::Ipv4Addr;

use rustyguard_utils::RadixTrie;

fn main() {
    divan::main();
}

fn populated() -> RadixTrie<u32, 4> {
    let mut trie = RadixTrie::new();
    for i in 0..254u8 {
        trie.insert([10, 0, i, 0], 24, i as u32);
    }
    trie
}

#[divan::bench]
fn lookup_hit(bencher: divan::Bencher) {
    let trie = populated();
    let addr: Ipv4Addr = "10.0.128.5".parse().unwrap();
    let key = addr.octets();

    bencher.bench_local(|| trie.lookup(&key));
}

#[divan::bench]
fn lookup_miss(bencher: divan::Bencher) {
    let trie = populated();
    let addr: Ipv4Addr = "192.168.0.1".parse().unwrap();
    let key = addr.octets();

    bencher.bench_local(|| trie.lookup(&key));
}

#[divan::bench]
fn insert(bencher: divan::Bencher) {
    bencher.bench_local(|| {
        let mut trie = RadixTrie::<u32, 4>::new();
        trie.insert([10, 0, 0, 0], 24, 1);
    });
}
