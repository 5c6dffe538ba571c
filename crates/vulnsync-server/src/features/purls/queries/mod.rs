pub mod find_vulnerabilities;

pub use find_vulnerabilities::{FindVulnerabilitiesQuery, FindVulnerabilitiesResponse};
