//! OVN logical topology controller
//!
//! Converts cluster nodes and namespaces into logical routers, switches and
//! ports in the OVN northbound database, allocates node host subnets, and
//! tracks the topology version used to gate upgrades.

pub mod addressset;
pub mod allocator;
pub mod cli;
pub mod config;
pub mod controller;
pub mod events;
pub mod kube;
pub mod loadbalancer;
pub mod nbdb;
pub mod netutil;
pub mod retry;
