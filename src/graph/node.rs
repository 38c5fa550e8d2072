/// Node types and graph construction.
///
/// Nodes are plain data: a kind with its parsed static config, plus
/// parent/child id lists in edge order. All mutable run state lives in
/// [`NodeState`] records keyed by node id, so the scheduler can borrow
/// the graph immutably while mutating states.
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::models::strategy::{
    ConditionExpr, EndConditions, NodeDef, OrderConfig, StrategyDocument,
};
use crate::models::{OrderSide, OrderType};
use crate::options::OptionPattern;

/// Node identifier (document-side id).
pub type NodeId = String;

/// Execution status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Plays no part this tick
    Inactive,
    /// May execute on the next tick
    Active,
    /// Has an order awaiting a fill signal; must not re-emit orders
    Pending,
}

/// Mutable per-node run state.
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Current status
    pub status: NodeStatus,
    /// Whether the node already executed in the current cycle
    pub visited: bool,
    /// Lineage counter, propagated parent → child as a running maximum
    pub re_entry_num: u32,
    /// Order id the node is waiting on while Pending
    pub pending_order_id: Option<String>,
    /// Position the pending order will close (exit nodes)
    pub pending_target: Option<String>,
}

impl NodeState {
    fn inactive() -> Self {
        Self {
            status: NodeStatus::Inactive,
            visited: false,
            re_entry_num: 0,
            pending_order_id: None,
            pending_target: None,
        }
    }
}

/// What an entry node trades.
#[derive(Debug, Clone)]
pub enum EntryTarget {
    /// A dynamic option pattern, resolved at execution time
    Pattern(OptionPattern),
    /// A fixed canonical symbol (or bare underlying)
    Symbol(String),
}

/// Parsed entry-node configuration.
#[derive(Debug, Clone)]
pub struct EntryConfig {
    /// What to trade
    pub target: EntryTarget,
    /// Quantity in units
    pub quantity: i64,
    /// Order direction
    pub side: OrderSide,
    /// Market or limit
    pub order_type: OrderType,
    /// Product type forwarded to the broker
    pub product_type: String,
    /// Exchange segment
    pub exchange: String,
}

/// Parsed exit-node configuration.
#[derive(Debug, Clone)]
pub struct ExitConfig {
    /// Exact position to close; `None` closes all open positions
    pub target_position_vpi: Option<String>,
    /// Market or limit
    pub order_type: OrderType,
    /// Product type forwarded to the broker
    pub product_type: String,
    /// Exchange segment
    pub exchange: String,
}

/// A node kind with its static configuration.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Graph root; holds the instrument config in the document
    Start,
    /// Gates entries on a boolean condition
    EntrySignal {
        /// Condition re-evaluated every tick until true
        conditions: ConditionExpr,
    },
    /// Places the opening order
    Entry {
        /// Order configuration
        config: EntryConfig,
    },
    /// Gates exits on a boolean condition
    ExitSignal {
        /// Condition re-evaluated every tick until true
        conditions: ConditionExpr,
    },
    /// Places the closing order
    Exit {
        /// Order configuration
        config: ExitConfig,
    },
    /// Re-arms an entry, incrementing the lineage counter up to a cap
    ReEntrySignal {
        /// Optional gate condition; absent means fire when active
        conditions: Option<ConditionExpr>,
        /// Maximum re-entries on the lineage
        max_re_entries: u32,
    },
    /// Strategy-level exit: flattens everything and ends the run
    SquareOff {
        /// Exit conditions in fixed priority order
        end_conditions: EndConditions,
    },
}

impl NodeKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::EntrySignal { .. } => "EntrySignal",
            Self::Entry { .. } => "Entry",
            Self::ExitSignal { .. } => "ExitSignal",
            Self::Exit { .. } => "Exit",
            Self::ReEntrySignal { .. } => "ReEntrySignal",
            Self::SquareOff { .. } => "SquareOff",
        }
    }
}

/// A node with its relationships.
#[derive(Debug, Clone)]
pub struct Node {
    /// Document-side id
    pub id: NodeId,
    /// Kind and static config
    pub kind: NodeKind,
    /// Parent ids, in edge order
    pub parents: Vec<NodeId>,
    /// Child ids, in edge order
    pub children: Vec<NodeId>,
}

/// The immutable strategy graph.
#[derive(Debug)]
pub struct NodeGraph {
    nodes: BTreeMap<NodeId, Node>,
    start_id: NodeId,
}

impl NodeGraph {
    /// Build the graph from a strategy document.
    ///
    /// Virtual document nodes (`strategyOverview`) are skipped; an
    /// unknown type is an error, as is a missing start node or a cycle
    /// that does not pass through a re-entry signal.
    pub fn from_document(document: &StrategyDocument) -> Result<Self> {
        let mut nodes: BTreeMap<NodeId, Node> = BTreeMap::new();
        let mut start_id: Option<NodeId> = None;

        for def in &document.nodes {
            let Some(kind) = parse_kind(def)? else {
                debug!(id = %def.id, node_type = %def.node_type, "skipping virtual node");
                continue;
            };
            if matches!(kind, NodeKind::Start) {
                if start_id.is_some() {
                    return Err(EngineError::document("multiple start nodes"));
                }
                start_id = Some(def.id.clone());
            }
            nodes.insert(
                def.id.clone(),
                Node {
                    id: def.id.clone(),
                    kind,
                    parents: Vec::new(),
                    children: Vec::new(),
                },
            );
        }

        let start_id = start_id.ok_or_else(|| EngineError::document("no start node"))?;

        for edge in &document.edges {
            if !nodes.contains_key(&edge.source) || !nodes.contains_key(&edge.target) {
                warn!(source = %edge.source, target = %edge.target, "edge references unknown node; ignored");
                continue;
            }
            nodes
                .get_mut(&edge.source)
                .expect("checked above")
                .children
                .push(edge.target.clone());
            nodes
                .get_mut(&edge.target)
                .expect("checked above")
                .parents
                .push(edge.source.clone());
        }

        let graph = Self { nodes, start_id };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// The start node id.
    pub fn start_id(&self) -> &NodeId {
        &self.start_id
    }

    /// Node lookup.
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All node ids.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fresh run state: start node Active, everything else Inactive.
    pub fn initial_states(&self) -> HashMap<NodeId, NodeState> {
        self.nodes
            .keys()
            .map(|id| {
                let mut state = NodeState::inactive();
                if *id == self.start_id {
                    state.status = NodeStatus::Active;
                }
                (id.clone(), state)
            })
            .collect()
    }

    /// Cycles are disallowed except through a re-entry signal, which is
    /// the one sanctioned loop (bounded by the lineage cap).
    fn check_acyclic(&self) -> Result<()> {
        // DFS over edges whose source is not a ReEntrySignal
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }
        let mut marks: HashMap<&NodeId, Mark> = HashMap::new();

        fn visit<'a>(
            graph: &'a NodeGraph,
            id: &'a NodeId,
            marks: &mut HashMap<&'a NodeId, Mark>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    return Err(EngineError::document(format!(
                        "cycle through node '{id}' without a re-entry signal"
                    )));
                }
                None => {}
            }
            marks.insert(id, Mark::InProgress);
            let node = graph.get(id).expect("ids come from the map");
            if !matches!(node.kind, NodeKind::ReEntrySignal { .. }) {
                for child in &node.children {
                    visit(graph, child, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let ids: Vec<&NodeId> = self.nodes.keys().collect();
        for id in ids {
            visit(self, id, &mut marks)?;
        }
        Ok(())
    }

    /// Ids of nodes reachable from the start node (diagnostics).
    pub fn reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.start_id.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.get(&id) {
                stack.extend(node.children.iter().cloned());
            }
        }
        seen
    }
}

fn parse_kind(def: &NodeDef) -> Result<Option<NodeKind>> {
    let missing = |what: &str| {
        EngineError::document(format!(
            "node '{}' ({}) is missing {what}",
            def.id, def.node_type
        ))
    };

    let kind = match def.node_type.as_str() {
        "startNode" | "start" => NodeKind::Start,
        "entrySignalNode" => NodeKind::EntrySignal {
            conditions: def
                .data
                .conditions
                .clone()
                .ok_or_else(|| missing("conditions"))?,
        },
        "exitSignalNode" => NodeKind::ExitSignal {
            conditions: def
                .data
                .conditions
                .clone()
                .ok_or_else(|| missing("conditions"))?,
        },
        "reEntrySignalNode" => NodeKind::ReEntrySignal {
            conditions: def.data.conditions.clone(),
            max_re_entries: def
                .data
                .re_entry_config
                .as_ref()
                .ok_or_else(|| missing("reEntryConfig"))?
                .max_re_entries,
        },
        "entryNode" | "entry" => {
            let config = def
                .data
                .order_config
                .as_ref()
                .ok_or_else(|| missing("orderConfig"))?;
            NodeKind::Entry {
                config: parse_entry_config(&def.id, config)?,
            }
        }
        "exitNode" | "exit" => {
            let config = def.data.order_config.clone().unwrap_or_else(|| {
                // An exit with no config closes all open positions at market
                serde_json::from_str("{}").expect("empty order config deserializes")
            });
            NodeKind::Exit {
                config: ExitConfig {
                    target_position_vpi: config.target_position_vpi.clone(),
                    order_type: config.order_type,
                    product_type: config.product_type.clone(),
                    exchange: config.exchange.clone(),
                },
            }
        }
        "squareOffNode" => NodeKind::SquareOff {
            end_conditions: def.data.end_conditions.clone().unwrap_or_default(),
        },
        "strategyOverview" => return Ok(None),
        other => {
            return Err(EngineError::document(format!(
                "unknown node type '{other}' on node '{}'",
                def.id
            )));
        }
    };
    Ok(Some(kind))
}

fn parse_entry_config(node_id: &str, config: &OrderConfig) -> Result<EntryConfig> {
    let raw_target = config.symbol.as_deref().ok_or_else(|| {
        EngineError::document(format!("entry node '{node_id}' has no target symbol"))
    })?;
    let target = if OptionPattern::is_pattern(raw_target) {
        EntryTarget::Pattern(OptionPattern::parse(raw_target)?)
    } else {
        EntryTarget::Symbol(raw_target.to_string())
    };
    Ok(EntryConfig {
        target,
        quantity: config.quantity,
        side: config.side.unwrap_or(OrderSide::Buy),
        order_type: config.order_type,
        product_type: config.product_type.clone(),
        exchange: config.exchange.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::strategy::EdgeDef;

    fn doc(json: &str) -> StrategyDocument {
        StrategyDocument::from_json(json).unwrap()
    }

    const LINEAR: &str = r#"{
        "nodes": [
            {"id": "s", "type": "startNode", "data": {}},
            {"id": "es", "type": "entrySignalNode", "data": {
                "conditions": {"compare": {"lhs": {"ltp": null}, "op": "above", "rhs": {"const": 0.0}}}
            }},
            {"id": "e", "type": "entryNode", "data": {
                "orderConfig": {"symbol": "TI:W0:ATM:CE", "quantity": 50, "side": "BUY"}
            }},
            {"id": "ov", "type": "strategyOverview", "data": {}}
        ],
        "edges": [
            {"source": "s", "target": "es"},
            {"source": "es", "target": "e"}
        ]
    }"#;

    #[test]
    fn test_build_linear_graph() {
        let graph = NodeGraph::from_document(&doc(LINEAR)).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.start_id(), "s");
        assert_eq!(graph.get("s").unwrap().children, vec!["es"]);
        assert_eq!(graph.get("e").unwrap().parents, vec!["es"]);
        // Virtual node skipped
        assert!(graph.get("ov").is_none());
    }

    #[test]
    fn test_initial_states() {
        let graph = NodeGraph::from_document(&doc(LINEAR)).unwrap();
        let states = graph.initial_states();
        assert_eq!(states["s"].status, NodeStatus::Active);
        assert_eq!(states["es"].status, NodeStatus::Inactive);
        assert_eq!(states["e"].status, NodeStatus::Inactive);
        assert!(states.values().all(|s| !s.visited && s.re_entry_num == 0));
    }

    #[test]
    fn test_missing_start_node() {
        let document = StrategyDocument {
            strategy_name: None,
            nodes: vec![],
            edges: vec![],
        };
        assert!(NodeGraph::from_document(&document).is_err());
    }

    #[test]
    fn test_entry_target_parses_pattern_vs_symbol() {
        let graph = NodeGraph::from_document(&doc(LINEAR)).unwrap();
        let NodeKind::Entry { config } = &graph.get("e").unwrap().kind else {
            panic!("expected entry node");
        };
        assert!(matches!(config.target, EntryTarget::Pattern(_)));
        assert_eq!(config.quantity, 50);
    }

    #[test]
    fn test_re_entry_cycle_is_allowed() {
        let mut document = doc(LINEAR);
        document.nodes.push(crate::models::strategy::NodeDef {
            id: "re".into(),
            node_type: "reEntrySignalNode".into(),
            data: serde_json::from_str(
                r#"{"reEntryConfig": {"maxReEntries": 1}}"#,
            )
            .unwrap(),
        });
        document.edges.push(EdgeDef {
            source: "e".into(),
            target: "re".into(),
        });
        document.edges.push(EdgeDef {
            source: "re".into(),
            target: "es".into(),
        });
        assert!(NodeGraph::from_document(&document).is_ok());
    }

    #[test]
    fn test_plain_cycle_is_rejected() {
        let mut document = doc(LINEAR);
        document.edges.push(EdgeDef {
            source: "e".into(),
            target: "es".into(),
        });
        assert!(NodeGraph::from_document(&document).is_err());
    }

    #[test]
    fn test_unknown_node_type_is_rejected() {
        let mut document = doc(LINEAR);
        document.nodes.push(crate::models::strategy::NodeDef {
            id: "x".into(),
            node_type: "teleportNode".into(),
            data: Default::default(),
        });
        assert!(NodeGraph::from_document(&document).is_err());
    }
}
