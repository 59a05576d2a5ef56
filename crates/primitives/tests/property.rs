use primitive_types::U256;
use unityd_consensus::SealType;
use unityd_primitives::block::{Block, BlockHeader};
use unityd_primitives::bloom::Bloom;
use unityd_primitives::encoding::{DecodeError, Decoder, Encoder};
use unityd_primitives::transaction::Transaction;

const MAX_COMPACT_SIZE: u64 = 0x0200_0000;

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u8(&mut self) -> u8 {
        (self.next_u64() >> 24) as u8
    }

    fn gen_range(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }
}

fn fill_bytes<const N: usize>(rng: &mut Lcg) -> [u8; N] {
    std::array::from_fn(|_| rng.next_u8())
}

fn random_vec(rng: &mut Lcg, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(max_len + 1);
    (0..len).map(|_| rng.next_u8()).collect()
}

fn random_block(rng: &mut Lcg) -> Block {
    let tx_count = rng.gen_range(4);
    let transactions = (0..tx_count)
        .map(|_| Transaction {
            nonce: rng.next_u64(),
            to: if rng.gen_range(2) == 0 {
                None
            } else {
                Some(fill_bytes::<20>(rng))
            },
            value: u128::from(rng.next_u64()) << 40,
            data: random_vec(rng, 40),
            energy_limit: rng.next_u64(),
            energy_price: rng.next_u64(),
            tx_type: rng.next_u8(),
            signature: random_vec(rng, 65),
        })
        .collect();
    Block {
        header: BlockHeader {
            parent_hash: fill_bytes(rng),
            number: rng.next_u64(),
            timestamp: rng.next_u64(),
            difficulty: U256::from(rng.next_u64()) * U256::from(rng.next_u64()),
            state_root: fill_bytes(rng),
            tx_trie_root: fill_bytes(rng),
            receipts_root: fill_bytes(rng),
            log_bloom: Bloom(fill_bytes(rng)),
            seal_type: if rng.gen_range(2) == 0 {
                SealType::Mining
            } else {
                SealType::Staking
            },
            coinbase: fill_bytes(rng),
            energy_limit: rng.next_u64(),
            energy_consumed: rng.next_u64(),
            extra_data: random_vec(rng, 32),
            seal: random_vec(rng, 96),
        },
        transactions,
    }
}

#[test]
fn random_blocks_survive_encoding() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..64 {
        let block = random_block(&mut rng);
        let decoded = Block::consensus_decode(&block.consensus_encode()).expect("decode");
        assert_eq!(decoded, block);
    }
}

#[test]
fn truncated_blocks_fail_cleanly() {
    let mut rng = Lcg::new(42);
    for _ in 0..16 {
        let bytes = random_block(&mut rng).consensus_encode();
        let cut = rng.gen_range(bytes.len());
        assert!(Block::consensus_decode(&bytes[..cut]).is_err());
    }
}

#[test]
fn oversized_compact_size_is_rejected() {
    let mut encoder = Encoder::new();
    encoder.write_varint(MAX_COMPACT_SIZE + 1);
    let bytes = encoder.into_inner();
    let mut decoder = Decoder::new(&bytes);
    assert_eq!(decoder.read_varint(), Err(DecodeError::SizeTooLarge));
}
