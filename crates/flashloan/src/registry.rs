use crate::{
    config::{FlashLoanTable, ProviderEntry},
    provider::FlashLoanProvider,
    providers::{
        DaiFlashMintProvider, MorphoProvider, PancakeswapV3Provider, UnsupportedProvider,
        WrapperProvider,
    },
};
use alloy_primitives::Address;
use arbx_primitives::{parse_address, Chain, Clock, FlashLoanProtocol, SupportStatus, SystemClock};
use parking_lot::RwLock;
use std::{collections::{BTreeMap, HashMap}, str::FromStr, sync::Arc};
use tracing::{debug, error, warn};

/// The only legitimate constructor of flash-loan providers.
///
/// Produces at most one provider per chain from the static configuration
/// table and caches it. A chain whose protocol is known but whose contract
/// address is missing yields no provider (logged); an unknown protocol name
/// yields the `unsupported` placeholder so fee estimation keeps working.
pub struct ProviderRegistry {
    table: FlashLoanTable,
    providers: RwLock<HashMap<Chain, Arc<dyn FlashLoanProvider>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("configured_chains", &self.table.keys().collect::<Vec<_>>())
            .field("cached", &self.providers.read().len())
            .finish()
    }
}

enum ConfiguredAddress {
    Ok(Address),
    Missing,
    Zero,
    Malformed(String),
}

fn configured_address(value: &Option<String>) -> ConfiguredAddress {
    match value {
        None => ConfiguredAddress::Missing,
        Some(raw) => match parse_address(raw) {
            Err(_) => ConfiguredAddress::Malformed(raw.clone()),
            Ok(addr) if addr == Address::ZERO => ConfiguredAddress::Zero,
            Ok(addr) => ConfiguredAddress::Ok(addr),
        },
    }
}

impl ProviderRegistry {
    /// Creates a registry over the configured table, using the wall clock for
    /// calldata deadlines.
    pub fn new(table: FlashLoanTable) -> Self {
        Self::with_clock(table, Arc::new(SystemClock))
    }

    /// Creates a registry with an injected clock.
    pub fn with_clock(table: FlashLoanTable, clock: Arc<dyn Clock>) -> Self {
        Self { table, providers: RwLock::new(HashMap::new()), clock }
    }

    /// Returns the chain's provider, constructing and caching it on first
    /// use.
    pub fn get_provider(&self, chain: Chain) -> Option<Arc<dyn FlashLoanProvider>> {
        if let Some(provider) = self.providers.read().get(&chain) {
            return Some(Arc::clone(provider))
        }

        let entry = match self.table.get(&chain) {
            Some(entry) => entry,
            None => {
                debug!(target: "flashloan", %chain, "no flash-loan provider configured");
                return None
            }
        };

        let provider = self.construct(chain, entry)?;
        let mut providers = self.providers.write();
        Some(Arc::clone(providers.entry(chain).or_insert(provider)))
    }

    /// Chains whose provider reports full support.
    pub fn fully_supported_chains(&self) -> Vec<Chain> {
        self.table
            .keys()
            .copied()
            .filter(|chain| self.support_status(*chain) == SupportStatus::FullySupported)
            .collect()
    }

    /// Support level per configured chain.
    pub fn support_summary(&self) -> BTreeMap<Chain, SupportStatus> {
        self.table.keys().map(|chain| (*chain, self.support_status(*chain))).collect()
    }

    /// Support level for one chain.
    pub fn support_status(&self, chain: Chain) -> SupportStatus {
        match self.get_provider(chain) {
            Some(provider) => provider.capabilities().status,
            None => SupportStatus::NotImplemented,
        }
    }

    fn construct(
        &self,
        chain: Chain,
        entry: &ProviderEntry,
    ) -> Option<Arc<dyn FlashLoanProvider>> {
        let routers = entry.approved_routers.clone();
        let clock = Arc::clone(&self.clock);

        let protocol = match FlashLoanProtocol::from_str(&entry.protocol) {
            Ok(protocol) => protocol,
            Err(_) => {
                warn!(
                    target: "flashloan",
                    %chain,
                    protocol = %entry.protocol,
                    "unknown flash-loan protocol, execution disabled"
                );
                return Some(Arc::new(UnsupportedProvider::new(
                    chain,
                    entry.protocol.clone(),
                    entry.fee_bps,
                )))
            }
        };

        match protocol {
            FlashLoanProtocol::AaveV3 => {
                let wrapper = self.require(chain, "wrapper", &entry.wrapper_address)?;
                Some(Arc::new(WrapperProvider::aave_v3(chain, wrapper, routers, clock)))
            }
            FlashLoanProtocol::BalancerV2 => {
                let wrapper = self.require(chain, "wrapper", &entry.wrapper_address)?;
                Some(Arc::new(WrapperProvider::balancer_v2(chain, wrapper, routers, clock)))
            }
            FlashLoanProtocol::Syncswap => {
                let wrapper = self.require(chain, "wrapper", &entry.wrapper_address)?;
                Some(Arc::new(WrapperProvider::syncswap(chain, wrapper, routers, clock)))
            }
            FlashLoanProtocol::PancakeswapV3 => {
                let wrapper = self.require(chain, "wrapper", &entry.wrapper_address)?;
                let factory = self.require(chain, "factory", &entry.factory_address)?;
                Some(Arc::new(PancakeswapV3Provider::new(
                    chain,
                    wrapper,
                    factory,
                    entry.fee_tier,
                    routers,
                    clock,
                )))
            }
            FlashLoanProtocol::DaiFlashMint => {
                let pool = self.require(chain, "pool", &entry.pool_address)?;
                let receiver = self.require(chain, "wrapper", &entry.wrapper_address)?;
                Some(Arc::new(DaiFlashMintProvider::new(chain, pool, receiver, routers, clock)))
            }
            FlashLoanProtocol::Morpho => {
                let pool = self.require(chain, "pool", &entry.pool_address)?;
                Some(Arc::new(MorphoProvider::new(chain, pool, routers, clock)))
            }
            FlashLoanProtocol::Unsupported => Some(Arc::new(UnsupportedProvider::new(
                chain,
                entry.protocol.clone(),
                entry.fee_bps,
            ))),
        }
    }

    fn require(&self, chain: Chain, what: &str, value: &Option<String>) -> Option<Address> {
        match configured_address(value) {
            ConfiguredAddress::Ok(addr) => Some(addr),
            ConfiguredAddress::Missing => {
                warn!(target: "flashloan", %chain, what, "contract address not configured");
                None
            }
            ConfiguredAddress::Zero => {
                error!(target: "flashloan", %chain, what, "contract address is all zeros");
                None
            }
            ConfiguredAddress::Malformed(raw) => {
                error!(target: "flashloan", %chain, what, raw, "contract address is malformed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> String {
        format!("{:?}", Address::repeat_byte(byte))
    }

    fn table() -> FlashLoanTable {
        let mut table = FlashLoanTable::new();
        table.insert(
            Chain::Ethereum,
            ProviderEntry {
                protocol: "aave_v3".to_string(),
                wrapper_address: Some(addr(0xa1)),
                ..Default::default()
            },
        );
        table.insert(
            Chain::Zksync,
            ProviderEntry {
                protocol: "syncswap".to_string(),
                wrapper_address: Some(addr(0xb2)),
                ..Default::default()
            },
        );
        table.insert(
            Chain::Polygon,
            ProviderEntry { protocol: "dodo_v2".to_string(), fee_bps: Some(4), ..Default::default() },
        );
        table.insert(
            Chain::Arbitrum,
            ProviderEntry {
                protocol: "balancer_v2".to_string(),
                wrapper_address: None,
                ..Default::default()
            },
        );
        table.insert(
            Chain::Base,
            ProviderEntry {
                protocol: "morpho".to_string(),
                pool_address: Some(format!("{:?}", Address::ZERO)),
                ..Default::default()
            },
        );
        table
    }

    #[test]
    fn providers_are_cached_per_chain() {
        let registry = ProviderRegistry::new(table());
        let first = registry.get_provider(Chain::Ethereum).unwrap();
        let second = registry.get_provider(Chain::Ethereum).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.protocol(), FlashLoanProtocol::AaveV3);
    }

    #[test]
    fn unknown_protocol_becomes_unsupported() {
        let registry = ProviderRegistry::new(table());
        let provider = registry.get_provider(Chain::Polygon).unwrap();
        assert_eq!(provider.protocol(), FlashLoanProtocol::Unsupported);
        // fee override still honored
        let fee = provider.calculate_fee(alloy_primitives::U256::from(10_000u64));
        assert_eq!(fee.fee_amount, alloy_primitives::U256::from(4u64));
    }

    #[test]
    fn missing_and_zero_addresses_yield_no_provider() {
        let registry = ProviderRegistry::new(table());
        assert!(registry.get_provider(Chain::Arbitrum).is_none());
        assert!(registry.get_provider(Chain::Base).is_none());
        assert!(registry.get_provider(Chain::Avalanche).is_none());
    }

    #[test]
    fn support_summary_levels() {
        let registry = ProviderRegistry::new(table());
        let summary = registry.support_summary();
        assert_eq!(summary[&Chain::Ethereum], SupportStatus::FullySupported);
        assert_eq!(summary[&Chain::Zksync], SupportStatus::PartialSupport);
        assert_eq!(summary[&Chain::Polygon], SupportStatus::NotImplemented);
        assert_eq!(summary[&Chain::Arbitrum], SupportStatus::NotImplemented);

        assert_eq!(registry.fully_supported_chains(), vec![Chain::Ethereum]);
    }
}
