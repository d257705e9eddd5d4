// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! X.509 SVID model: leaf/signer/chain certificates and trust-domain CA
//! bundles, validated through `rustls`'s webpki-backed verifiers rather than
//! a hand-rolled signature walk (SPEC_FULL.md Open Question 1).

mod algorithm;
mod certificate;
mod trust_bundle;

pub use algorithm::KeyAlgorithm;
pub use certificate::Certificate;
pub use trust_bundle::TrustBundle;
