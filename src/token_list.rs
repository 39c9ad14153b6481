//! Token catalog: merges the configured static token table with a dynamic
//! list fetched over HTTPS at startup (Trust Wallet for Ethereum, the
//! Polygon token list for Polygon), deduplicated by lowercase address with
//! static entries — and earlier dynamic entries — taking priority. Startup
//! fetch only; a refresh schedule is out of scope here.

use crate::settings::StaticToken;
use crate::types::{lower, AddressKey, Token};
use arc_swap::ArcSwap;
use ethers::types::Address;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

#[derive(serde::Deserialize)]
struct RemoteTokenList {
    tokens: Vec<RemoteToken>,
}

#[derive(serde::Deserialize)]
struct RemoteToken {
    address: String,
    symbol: String,
    name: String,
    decimals: u8,
    #[serde(rename = "logoURI", default)]
    logo_uri: Option<String>,
}

/// Copy-on-write holder for a chain's merged token list: written once at
/// startup (or on an explicit refresh), read lock-free by every snapshot
/// request.
pub struct TokenList {
    tokens: ArcSwap<Vec<Token>>,
}

impl TokenList {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens: ArcSwap::from_pointee(tokens) }
    }

    pub fn get(&self) -> Arc<Vec<Token>> {
        self.tokens.load_full()
    }

    pub fn replace(&self, tokens: Vec<Token>) {
        self.tokens.store(Arc::new(tokens));
    }
}

/// Loads the static catalog, then best-effort fetches the dynamic list at
/// `token_list_url` (if configured) and merges it in. A fetch failure is
/// logged and the static catalog alone is returned -- a dynamic list is an
/// enrichment, not a startup dependency.
pub async fn load_merged(
    chain_id: u64,
    static_tokens: &[StaticToken],
    token_list_url: Option<&str>,
    fetch_timeout: Duration,
) -> Vec<Token> {
    // IndexMap dedups by address while preserving first-seen order, so
    // static entries always win over dynamic ones without a separate pass.
    let mut merged: IndexMap<AddressKey, Token> = IndexMap::with_capacity(static_tokens.len());

    for st in static_tokens {
        let Ok(address) = Address::from_str(&st.address) else {
            warn!(address = %st.address, "skipping static token with invalid address");
            continue;
        };
        merged.entry(lower(address)).or_insert(Token {
            address,
            symbol: st.symbol.clone(),
            name: st.name.clone(),
            decimals: st.decimals,
            chain_id,
            logo_uri: st.logo_uri.clone(),
        });
    }

    if let Some(url) = token_list_url {
        match fetch_remote_list(url, fetch_timeout).await {
            Ok(remote) => {
                for rt in remote {
                    let Ok(address) = Address::from_str(&rt.address) else {
                        continue;
                    };
                    merged.entry(lower(address)).or_insert(Token {
                        address,
                        symbol: rt.symbol,
                        name: rt.name,
                        decimals: rt.decimals,
                        chain_id,
                        logo_uri: rt.logo_uri,
                    });
                }
            }
            Err(err) => {
                warn!(%url, error = %err, "dynamic token list fetch failed, continuing with static catalog only");
            }
        }
    }

    merged.into_values().collect()
}

/// A single client shared across every chain's token-list fetch, so startup
/// doesn't pay connection-pool warmup once per chain. Per-call timeout is
/// applied on the request itself rather than baked into the client.
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

async fn fetch_remote_list(url: &str, timeout: Duration) -> anyhow::Result<Vec<RemoteToken>> {
    let retry_strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);
    let url = url.to_string();

    let list: RemoteTokenList = Retry::spawn(retry_strategy, || {
        let url = url.clone();
        async move {
            HTTP_CLIENT.get(&url).timeout(timeout).send().await?.error_for_status()?.json::<RemoteTokenList>().await
        }
    })
    .await?;

    Ok(list.tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_token(addr: &str, symbol: &str) -> StaticToken {
        StaticToken {
            address: addr.to_string(),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            logo_uri: None,
        }
    }

    #[tokio::test]
    async fn static_only_merge_preserves_order_and_dedups() {
        let tokens = vec![
            static_token("0x0000000000000000000000000000000000000001", "AAA"),
            static_token("0x0000000000000000000000000000000000000001", "DUPLICATE"),
            static_token("0x0000000000000000000000000000000000000002", "BBB"),
        ];
        let merged = load_merged(1, &tokens, None, Duration::from_secs(1)).await;
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].symbol, "AAA");
    }

    #[tokio::test]
    async fn invalid_static_address_is_skipped_not_fatal() {
        let tokens = vec![static_token("not-an-address", "BAD")];
        let merged = load_merged(1, &tokens, None, Duration::from_secs(1)).await;
        assert!(merged.is_empty());
    }

    #[test]
    fn replace_is_visible_to_subsequent_get() {
        let list = TokenList::new(vec![]);
        assert!(list.get().is_empty());
        list.replace(vec![Token {
            address: Address::from_low_u64_be(1),
            symbol: "AAA".into(),
            name: "AAA".into(),
            decimals: 18,
            chain_id: 1,
            logo_uri: None,
        }]);
        assert_eq!(list.get().len(), 1);
    }
}
