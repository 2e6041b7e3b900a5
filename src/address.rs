use std::fmt;

use crate::error::Error;

/// A recipient email address, normalised for comparison.
///
/// Any display name is dropped (`Greg <GM2552@Cerner.com>` becomes
/// `gm2552@cerner.com`) and the remaining address is lowercased, so two
/// reports about the same mailbox always land on the same recipient.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(input: &str) -> Result<Address, Error> {
        let mut addr = input.trim();

        // Strip a display name, keeping what is inside the angle brackets
        if let (Some(open), Some(close)) = (addr.rfind('<'), addr.rfind('>')) {
            if open < close {
                addr = addr[open + 1..close].trim();
            }
        }

        if addr.is_empty() {
            return Err(Error::MalformedRecord(format!(
                "empty recipient address in {:?}",
                input
            )));
        }
        if !addr.contains('@') {
            return Err(Error::MalformedRecord(format!(
                "recipient address {:?} has no domain",
                input
            )));
        }

        Ok(Address(addr.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
