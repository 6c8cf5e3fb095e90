use crate::error::{ErrorKind, Result};
use conveyor_config::{Config, RouteOverride};
use conveyor_convert::CapabilityMap;
use conveyor_format::FormatCode;
use derive_more::Display;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

/// The formats a file still has to pass through, ending with its target.
///
/// A direct conversion is `[target]`; one through a bridge format is
/// `[bridge, target]`. Never empty while a file is being converted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route(VecDeque<FormatCode>);
impl Route {
    pub fn direct(to: FormatCode) -> Self {
        Self(VecDeque::from([to]))
    }

    /// `None` for an empty sequence.
    pub fn new(hops: impl IntoIterator<Item = FormatCode>) -> Option<Self> {
        let hops: VecDeque<_> = hops.into_iter().collect();
        (!hops.is_empty()).then_some(Self(hops))
    }

    /// The next format to produce.
    pub fn next(&self) -> Option<&FormatCode> {
        self.0.front()
    }

    pub fn target(&self) -> Option<&FormatCode> {
        self.0.back()
    }

    /// Consumes the next hop.
    pub fn advance(&mut self) -> Option<FormatCode> {
        self.0.pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatCode> {
        self.0.iter()
    }

    /// Whether every adjacent pair along `[from] + route` is declared in
    /// `capabilities`.
    pub fn is_executable(&self, from: &FormatCode, capabilities: &CapabilityMap) -> bool {
        self.first_unsupported(from, capabilities).is_none()
    }

    fn first_unsupported<'a>(
        &'a self,
        from: &'a FormatCode,
        capabilities: &CapabilityMap,
    ) -> Option<(&'a FormatCode, &'a FormatCode)> {
        let mut previous = from;
        for hop in &self.0 {
            if !capabilities.supports(previous, hop) {
                return Some((previous, hop));
            }
            previous = hop;
        }
        None
    }
}
impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{hop}")?;
        }
        Ok(())
    }
}

/// Knobs for [`RouteTable::build`].
#[derive(Debug, Clone)]
pub struct RouteOptions {
    /// Formats preferred as intermediates, in order of preference.
    pub bridges: Vec<FormatCode>,
    /// Longest route discovered automatically.
    pub max_hops: usize,
    /// Routes taking precedence over discovered ones.
    pub explicit: Vec<RouteOverride>,
}
impl Default for RouteOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}
impl From<&Config> for RouteOptions {
    fn from(config: &Config) -> Self {
        Self {
            bridges: config.bridges.clone(),
            max_hops: config.max_route_hops,
            explicit: config.routes.clone(),
        }
    }
}

/// Entry of a [`RouteTable`].
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[display("{from} -> {to}")]
pub struct Pair {
    pub from: FormatCode,
    pub to: FormatCode,
}

/// Known routes for `(source, target)` pairs.
///
/// A pair missing from the table is not an error: the planner falls back to a
/// direct attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable(BTreeMap<Pair, Route>);
impl RouteTable {
    /// Discovers the shortest route between every pair of formats connected
    /// in `capabilities`, applies the explicit routes on top, filters the
    /// result and checks it.
    ///
    /// Among routes of equal length, those through the configured bridge
    /// formats win, then lexical order decides.
    pub fn build(capabilities: &CapabilityMap, options: &RouteOptions) -> Result<Self> {
        let mut table = Self::default();
        let neighbours = Self::neighbours(capabilities, &options.bridges);
        for from in capabilities.sources() {
            for (to, route) in Self::discover(from, &neighbours, options.max_hops) {
                table.insert(from.clone(), to, route);
            }
        }
        let discovered = table.len();

        let mut explicit = Self::default();
        for r in &options.explicit {
            if let Some(route) = Route::new(r.via.iter().cloned().chain([r.to.clone()])) {
                explicit.insert(r.from.clone(), r.to.clone(), route);
            }
        }
        let requested = explicit.len();
        let explicit = explicit.filter_unsupported(capabilities);
        if explicit.len() < requested {
            tracing::warn!(dropped = requested - explicit.len(), "Ignoring explicit routes the converters cannot execute");
        }
        table.0.extend(explicit.0);

        let table = table.filter_unsupported(capabilities);
        table.check(capabilities)?;
        tracing::debug!(discovered, routes = table.len(), "Route table built");
        Ok(table)
    }

    /// Adjacency lists with bridges first, everything else in code order.
    fn neighbours<'a>(
        capabilities: &'a CapabilityMap,
        bridges: &[FormatCode],
    ) -> HashMap<&'a FormatCode, Vec<&'a FormatCode>> {
        let rank = |code: &FormatCode| bridges.iter().position(|b| b == code).unwrap_or(usize::MAX);
        capabilities
            .sources()
            .map(|from| {
                let mut targets: Vec<_> = capabilities.targets(from).collect();
                targets.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
                (from, targets)
            })
            .collect()
    }

    /// Breadth-first search from `from`, returning the first (and therefore
    /// shortest) route found to every reachable format.
    fn discover(
        from: &FormatCode,
        neighbours: &HashMap<&FormatCode, Vec<&FormatCode>>,
        max_hops: usize,
    ) -> Vec<(FormatCode, Route)> {
        let mut parents: HashMap<&FormatCode, &FormatCode> = HashMap::new();
        let mut seen: BTreeSet<&FormatCode> = BTreeSet::from([from]);
        let mut queue = VecDeque::from([(from, 0usize)]);
        let mut order = Vec::new();
        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_hops {
                continue;
            }
            for next in neighbours.get(node).into_iter().flatten().copied() {
                if seen.insert(next) {
                    parents.insert(next, node);
                    order.push(next);
                    queue.push_back((next, depth + 1));
                }
            }
        }
        order
            .into_iter()
            .filter_map(|to| {
                let mut hops = VecDeque::from([to.clone()]);
                let mut cursor = to;
                while let Some(parent) = parents.get(cursor).copied()
                    && parent != from
                {
                    hops.push_front(parent.clone());
                    cursor = parent;
                }
                Route::new(hops).map(|route| (to.clone(), route))
            })
            .collect()
    }

    pub fn insert(&mut self, from: FormatCode, to: FormatCode, route: Route) {
        self.0.insert(Pair { from, to }, route);
    }

    pub fn get(&self, from: &FormatCode, to: &FormatCode) -> Option<&Route> {
        // Owned key for the lookup; codes are reference counted so this is cheap.
        self.0.get(&Pair { from: from.clone(), to: to.clone() })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pair, &Route)> {
        self.0.iter()
    }

    /// Drops every entry with a hop no converter declares, or that does not
    /// end where its key says it does. Entries are checked in parallel.
    pub fn filter_unsupported(self, capabilities: &CapabilityMap) -> Self {
        Self(
            self.0
                .into_par_iter()
                .filter(|(pair, route)| {
                    pair.from != pair.to
                        && route.target() == Some(&pair.to)
                        && route.is_executable(&pair.from, capabilities)
                })
                .collect(),
        )
    }

    /// Fails on the first entry that is not executable end to end.
    fn check(&self, capabilities: &CapabilityMap) -> Result<()> {
        let broken = self.0.par_iter().find_map_any(|(pair, route)| route.first_unsupported(&pair.from, capabilities));
        if let Some((from, to)) = broken {
            exn::bail!(ErrorKind::InconsistentRoute { from: from.clone(), to: to.clone() });
        }
        Ok(())
    }
}
