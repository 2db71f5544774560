//! Per-destination state and the query/update/clear reactions on it.
//!
//! The reactions are synchronous: they mutate the destination and return
//! the packets to send, which the router delivers after releasing its lock.

use std::collections::BTreeMap;

use pcn_core::{ChannelFee, Peer, Strategy, WalletAddress};

use super::node_height::{Height, LinkStatus, NeighborLink};
use super::HeightMessage;
use crate::base::Neighbor;
use crate::route::Route;
use crate::scoring::RouteChoiceWeights;

/// What a reaction needs to know about the node.
pub(crate) struct Context<'a> {
    pub me: &'a Peer,
    pub cycle: u64,
    pub strategy: &'a Strategy,
    pub neighbors: &'a BTreeMap<WalletAddress, Neighbor>,
    /// Router-wide TTL budget.
    pub ttl: i64,
}

impl Context<'_> {
    fn wallet(&self) -> &WalletAddress {
        &self.me.wallet_address
    }

    /// One-hop route from us to the neighbor that is the destination.
    fn direct_route(&self, neighbor: &Neighbor) -> Route {
        let hop = self.strategy.disclose(neighbor.outbound(ChannelFee::ZERO));
        Route::single_hop(hop, neighbor.peer.clone())
    }
}

/// A packet for the neighbor `to`.
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    pub to: WalletAddress,
    pub message: HeightMessage,
}

#[derive(Debug, Clone)]
pub struct Destination {
    pub id: WalletAddress,
    pub height: Height,
    pub route_required: bool,
    pub remaining_ttl: i64,
    pub last_update_sent: Option<u64>,
    pub links: Vec<NeighborLink>,
    /// Routes advertised by neighbors, keyed implicitly by their first hop.
    pub routes: Vec<Route>,
}

impl Destination {
    pub(crate) fn new(id: WalletAddress, ctx: &Context<'_>) -> Self {
        let mut dest = Self {
            id,
            height: Height::null(ctx.wallet().clone()),
            route_required: false,
            remaining_ttl: ctx.ttl,
            last_update_sent: None,
            links: Vec::new(),
            routes: Vec::new(),
        };
        for neighbor in ctx.neighbors.values() {
            let mut link = NeighborLink::new(neighbor.wallet().clone(), ctx.cycle);
            if neighbor.wallet() == &dest.id {
                link.height = link.height.to_zero();
                link.update_status(&dest.height);
                dest.routes.push(ctx.direct_route(neighbor));
            }
            dest.links.push(link);
        }
        dest
    }

    pub fn has_downstream(&self) -> bool {
        self.links.iter().any(|l| l.status == LinkStatus::Downstream)
    }

    pub fn all_undirected(&self) -> bool {
        self.links.iter().all(|l| l.status == LinkStatus::Undirected)
    }

    pub fn downstream_links(&self) -> Vec<WalletAddress> {
        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::Downstream)
            .map(|l| l.id.clone())
            .collect()
    }

    fn link_status(&self, id: &WalletAddress) -> Option<LinkStatus> {
        self.links.iter().find(|l| &l.id == id).map(|l| l.status)
    }

    fn update_statuses(&mut self) {
        let own = self.height.clone();
        for link in &mut self.links {
            link.update_status(&own);
        }
    }

    fn generate_or_null(&mut self, ctx: &Context<'_>) {
        self.height = if self.links.iter().any(|l| l.status == LinkStatus::Upstream) {
            Height::generated(ctx.wallet().clone(), ctx.cycle)
        } else {
            self.height.to_null()
        };
    }

    /// Update for neighbor `nid`: our height plus every downstream route
    /// not already passing `nid`, extended by the hop from `nid` to us.
    fn neighbor_update(&self, nid: &WalletAddress, ctx: &Context<'_>, ttl: i64) -> Option<Outbound> {
        let neighbor = ctx.neighbors.get(nid)?;
        let routes = self
            .routes
            .iter()
            .filter(|route| {
                route.first_hop().is_some_and(|hop| {
                    self.link_status(&hop.to_wallet) == Some(LinkStatus::Downstream)
                }) && !route.peers.contains_key(nid)
            })
            .filter_map(|route| {
                let next_hop = &route.first_hop()?.to_wallet;
                let hop = ctx
                    .strategy
                    .disclose(neighbor.inbound(ctx.strategy.fee_toward(next_hop)));
                let mut route = route.clone();
                route.prepend(hop, ctx.me.clone());
                Some(route)
            })
            .collect();
        Some(Outbound {
            to: nid.clone(),
            message: HeightMessage::Update {
                destination: self.id.clone(),
                sender_height: self.height.clone(),
                routes,
                ttl: ttl - 1,
            },
        })
    }

    fn updates_to_all(&mut self, ctx: &Context<'_>, ttl: i64) -> Vec<Outbound> {
        let out = self
            .links
            .iter()
            .filter_map(|l| self.neighbor_update(&l.id, ctx, ttl))
            .collect();
        self.last_update_sent = Some(ctx.cycle);
        out
    }

    /// Mark a route as required and query every link.
    pub(crate) fn query_all(&mut self, ttl: i64) -> Vec<Outbound> {
        self.route_required = true;
        self.remaining_ttl = ttl;
        self.links
            .iter()
            .map(|l| Outbound {
                to: l.id.clone(),
                message: HeightMessage::Query {
                    destination: self.id.clone(),
                    ttl: ttl - 1,
                },
            })
            .collect()
    }

    pub(crate) fn on_query(&mut self, sender: &WalletAddress, ttl: i64, ctx: &Context<'_>) -> Vec<Outbound> {
        if ttl <= 0 {
            return Vec::new();
        }
        if self.all_undirected() {
            if self.route_required {
                return Vec::new();
            }
            return self.query_all(ttl);
        }
        if !self.has_downstream() {
            return Vec::new();
        }

        if self.height.is_null() {
            let Some(lowest) = self
                .links
                .iter()
                .filter(|l| l.status == LinkStatus::Downstream)
                .map(|l| &l.height)
                .min()
                .cloned()
            else {
                return Vec::new();
            };
            self.height = self.height.to_reference_level(&lowest);
            self.route_required = false;
            self.update_statuses();
            return self.updates_to_all(ctx, ttl - 1);
        }

        let Some(sender) = self.links.iter().find(|l| &l.id == sender) else {
            return Vec::new();
        };
        if self.last_update_sent < Some(sender.active_since) {
            return self.updates_to_all(ctx, ttl - 1);
        }
        Vec::new()
    }

    /// Returns the packets to send and whether a pending route request has
    /// just been satisfied.
    pub(crate) fn on_update(
        &mut self,
        sender_height: Height,
        routes: Vec<Route>,
        ttl: i64,
        ctx: &Context<'_>,
    ) -> (Vec<Outbound>, bool) {
        if ttl <= 0 {
            return (Vec::new(), false);
        }
        let sender = sender_height.id.clone();
        let Some(link) = self.links.iter_mut().find(|l| l.id == sender) else {
            return (Vec::new(), false);
        };
        link.height = sender_height.clone();

        self.routes
            .retain(|r| r.first_hop().map(|h| &h.to_wallet) != Some(&sender));
        for route in routes {
            if !self.routes.contains(&route) {
                self.routes.push(route);
            }
        }

        if self.route_required {
            self.height = self.height.to_reference_level(&sender_height);
            self.route_required = false;
            self.update_statuses();
            let out = self.updates_to_all(ctx, ttl - 1);
            return (out, self.has_downstream());
        }

        let own = self.height.clone();
        if let Some(link) = self.links.iter_mut().find(|l| l.id == sender) {
            link.update_status(&own);
        }
        if self.has_downstream() {
            return (Vec::new(), false);
        }

        // Lost the last downstream link: derive a new height from the
        // reference levels of the neighbors.
        let mut heights: Vec<&Height> = self.links.iter().map(|l| &l.height).collect();
        heights.sort();
        let mut levels: Vec<&Height> = Vec::new();
        for &h in &heights {
            if !levels.iter().any(|l| l.same_reference_level(h)) {
                levels.push(h);
            }
        }
        let Some(&highest) = levels.last() else {
            return (Vec::new(), false);
        };
        let highest = highest.clone();

        if levels.len() > 1 {
            // Propagate.
            let min_delta = heights
                .iter()
                .find(|h| h.same_reference_level(&highest))
                .map_or(highest.delta, |h| h.delta);
            self.height = Height {
                delta: min_delta - 1,
                id: self.height.id.clone(),
                ..highest
            };
        } else if !highest.reflected {
            // Reflect.
            self.height = Height {
                reflected: true,
                delta: 0,
                id: self.height.id.clone(),
                ..highest
            };
        } else if highest.oid.as_ref() == Some(ctx.wallet()) {
            // Our own reflected level came back: partition detected.
            self.height.reflected = true;
            let reference = self.height.clone();
            return (self.on_clear(&reference, ttl - 1, ctx), false);
        } else {
            self.height = Height::generated(ctx.wallet().clone(), ctx.cycle);
        }
        self.update_statuses();
        (self.updates_to_all(ctx, ttl - 1), false)
    }

    pub(crate) fn on_clear(&mut self, reference: &Height, ttl: i64, ctx: &Context<'_>) -> Vec<Outbound> {
        if ttl <= 0 {
            return Vec::new();
        }
        let destination = self.id.clone();
        let reset = |link: &mut NeighborLink| {
            link.height = if link.id == destination {
                link.height.to_zero()
            } else {
                link.height.to_null()
            };
        };

        if self.height.same_reference_level(reference) {
            self.height = self.height.to_null();
            let own = self.height.clone();
            let mut out = Vec::with_capacity(self.links.len());
            for link in &mut self.links {
                reset(link);
                link.update_status(&own);
                out.push(Outbound {
                    to: link.id.clone(),
                    message: HeightMessage::Clear {
                        destination: destination.clone(),
                        reference_level: reference.clone(),
                        ttl: ttl - 1,
                    },
                });
            }
            return out;
        }

        let own = self.height.clone();
        for link in self
            .links
            .iter_mut()
            .filter(|l| l.height.same_reference_level(reference))
        {
            reset(link);
            link.update_status(&own);
        }
        if self.has_downstream() {
            return Vec::new();
        }
        self.generate_or_null(ctx);
        self.update_statuses();
        self.updates_to_all(ctx, ttl - 1)
    }

    /// Drop the link to `partner`. Returned packets are meant to be
    /// deferred.
    pub(crate) fn link_down(&mut self, partner: &WalletAddress, ctx: &Context<'_>) -> Vec<Outbound> {
        self.links.retain(|l| &l.id != partner);
        self.routes
            .retain(|r| r.first_hop().map(|h| &h.to_wallet) != Some(partner));
        if self.has_downstream() {
            return Vec::new();
        }
        self.generate_or_null(ctx);
        self.update_statuses();
        let ttl = ctx.ttl - self.height.delta;
        self.updates_to_all(ctx, ttl)
    }

    /// Add a link for a new neighbor. Returned packets are meant to be
    /// deferred.
    pub(crate) fn link_up(&mut self, neighbor: &Neighbor, ctx: &Context<'_>) -> Vec<Outbound> {
        if self.links.iter().any(|l| &l.id == neighbor.wallet()) {
            return Vec::new();
        }
        let mut link = NeighborLink::new(neighbor.wallet().clone(), ctx.cycle);
        if neighbor.wallet() == &self.id {
            link.height = link.height.to_zero();
            link.update_status(&self.height);
            self.routes.push(ctx.direct_route(neighbor));
        }
        self.links.push(link);

        if !self.route_required {
            return Vec::new();
        }
        vec![Outbound {
            to: neighbor.wallet().clone(),
            message: HeightMessage::Query {
                destination: self.id.clone(),
                ttl: self.remaining_ttl,
            },
        }]
    }

    /// The downstream neighbor to forward a route request to: first hop of
    /// the best-scoring annotated route, else the lowest downstream link.
    pub fn best_next_hop(&self, weights: &RouteChoiceWeights) -> Option<WalletAddress> {
        let valid: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| {
                r.first_hop().is_some_and(|h| {
                    self.link_status(&h.to_wallet) == Some(LinkStatus::Downstream)
                })
            })
            .collect();
        let shortest = valid.iter().map(|r| r.hop_count()).min().unwrap_or(0);

        let mut best: Option<(f64, &Route)> = None;
        for route in valid {
            let liquidities: Vec<f64> = route.channels.iter().map(|c| c.liquidity).collect();
            let min = liquidities.iter().copied().fold(f64::INFINITY, f64::min);
            let avg = liquidities.iter().sum::<f64>() / liquidities.len() as f64;
            let c = weights.score(min, avg, shortest, route.hop_count());
            if best.map_or(true, |(b, _)| c > b) {
                best = Some((c, route));
            }
        }
        if let Some((_, route)) = best {
            return route.first_hop().map(|h| h.to_wallet.clone());
        }

        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::Downstream)
            .min_by(|a, b| a.height.cmp(&b.height))
            .map(|l| l.id.clone())
    }
}
