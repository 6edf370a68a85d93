//! Built-in descheduling strategies.

pub mod interpod_affinity;

pub use interpod_affinity::{
    AffinityOracle, InterPodAffinityChecker, RemovePodsViolatingInterPodAffinity,
    RemovePodsViolatingInterPodAffinityArgs,
};
