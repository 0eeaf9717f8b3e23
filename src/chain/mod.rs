//! On-chain reads
//!
//! position manager -> pool address -> pool state -> gauge rewards, each a
//! function of its inputs plus eth_calls through a [`ContractCaller`]. The
//! token metadata cache is the only state kept between calls.

mod abi;
mod caller;
mod metadata;
mod pool_address;
mod pool_state;
mod position;
mod rewards;

pub use caller::{ContractCaller, RpcCaller};
pub use metadata::{CachePolicy, SystemClock, TokenMetadataCache};
pub use pool_address::{checksummed, PoolAddressResolver};
pub use pool_state::{PoolSnapshot, PoolStateReader};
pub use position::{PositionRead, PositionReader};
pub use rewards::{PendingRewards, RewardAggregator};

#[cfg(test)]
pub use pool_address::salted_pool_address;
