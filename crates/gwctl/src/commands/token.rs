//! `gwctl token`: mint an HMAC-signed bearer token for local testing
//! against a `gwctl serve` instance started with the same `GW_HMAC_SECRET`.

use gw_core::{HmacTokenValidator, TenantId};

pub fn execute(tenant: Option<&str>, scopes: &[String]) -> anyhow::Result<()> {
    let tenant = match tenant {
        Some(raw) => TenantId::parse(raw).ok_or_else(|| anyhow::anyhow!("invalid tenant id '{raw}'"))?,
        None => TenantId::new(),
    };

    let secret = std::env::var("GW_HMAC_SECRET").map_err(|_| anyhow::anyhow!("GW_HMAC_SECRET must be set to mint a token"))?;
    let validator = HmacTokenValidator::new(secret.into_bytes());
    let scope_refs: Vec<&str> = scopes.iter().map(String::as_str).collect();
    let token = validator.sign(tenant, &scope_refs);

    println!("tenant: {tenant}");
    println!("token:  {token}");
    Ok(())
}
