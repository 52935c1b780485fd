// lib.rs — attestcheck: verify signed supply-chain attestations against a
// trust policy
//
// Signed DSSE envelopes carrying in-toto statements are checked against the
// policy's public keys and certificate bundles, and the statements that
// verified are judged against the policy's steps.

pub mod attest;
pub mod crypto;
pub mod hash;
