//! Helper functions for environment variables

fn get_non_empty_env_var_or_panic(name: &'static str) -> String {
    let result = std::env::var_os(name)
        .unwrap_or_else(|| panic!("{name} environment variable not defined"))
        .into_string()
        .expect("Couldn't convert OsString into a String");
    if result.is_empty() {
        panic!("{name} environment variable is empty")
    } else {
        result
    }
}

/// Returns the Alchemy JSON-RPC URL for Ethereum mainnet.
///
/// # Panics
///
/// Panics if the `ALCHEMY_URL` environment variable is not defined or is
/// empty.
pub fn get_alchemy_url() -> String {
    get_non_empty_env_var_or_panic("ALCHEMY_URL")
}
