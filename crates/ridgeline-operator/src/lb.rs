//! Cloud load-balancer lookup seam
//!
//! On clouds where the ingress service is fronted by a managed load
//! balancer, DNS registration needs the balancer's hosted zone. The cloud
//! API clients themselves live outside this crate; the reconciler only
//! depends on this trait.

use async_trait::async_trait;

use ridgeline_core::LoadBalancerDescriptor;

use crate::error::Result;

/// Looks up managed load balancers by their DNS name
#[async_trait]
pub trait LoadBalancerLookup: Send + Sync {
    async fn find_by_dns_name(&self, dns_name: &str) -> Result<Option<LoadBalancerDescriptor>>;
}

/// Lookup for environments without managed load balancers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoadBalancerLookup;

#[async_trait]
impl LoadBalancerLookup for NoLoadBalancerLookup {
    async fn find_by_dns_name(&self, _dns_name: &str) -> Result<Option<LoadBalancerDescriptor>> {
        Ok(None)
    }
}
