//! Block reward schedule.

use crate::money::Amount;
use crate::params::ChainParams;

/// Coinbase reward for the block at `number`.
///
/// The reward ramps linearly from `ramp_up_start_reward` at the lower bound to
/// `block_reward` at the upper bound and stays flat afterwards.
pub fn block_reward(number: u64, params: &ChainParams) -> Amount {
    let lower = params.ramp_up_lower_bound;
    let upper = params.ramp_up_upper_bound;
    if number >= upper || upper <= lower {
        return params.block_reward;
    }
    if number <= lower {
        return params.ramp_up_start_reward;
    }
    let start = params.ramp_up_start_reward;
    let end = params.block_reward;
    let span = Amount::from(upper - lower);
    let progress = Amount::from(number - lower);
    if end >= start {
        start + (end - start) * progress / span
    } else {
        start - (start - end) * progress / span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{chain_params, Network};

    #[test]
    fn ramp_up_is_monotonic_and_bounded() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(block_reward(0, &params), params.ramp_up_start_reward);
        assert_eq!(
            block_reward(params.ramp_up_upper_bound, &params),
            params.block_reward
        );
        assert_eq!(block_reward(10_000_000, &params), params.block_reward);

        let mut previous = block_reward(0, &params);
        for number in (1..params.ramp_up_upper_bound).step_by(9_973) {
            let reward = block_reward(number, &params);
            assert!(reward >= previous, "reward dropped at {number}");
            assert!(reward <= params.block_reward);
            previous = reward;
        }
    }

    #[test]
    fn regtest_reward_is_flat() {
        let params = chain_params(Network::Regtest);
        assert_eq!(block_reward(0, &params), params.block_reward);
        assert_eq!(block_reward(1, &params), params.block_reward);
    }
}
