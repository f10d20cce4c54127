//! Functional-unit queues, the token channels between them and the table
//! that routes each instruction to a queue.

use std::fmt;

use crate::encoding::{MemoryId, Opcode};
use crate::instruction::{DepFlags, Instruction};

/// One of the three in-order instruction queues of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Unit {
    /// DRAM to input / weight buffer transfers.
    Load,
    /// GEMM, ALU, micro-op and accumulator loads, FINISH.
    Compute,
    /// Output buffer to DRAM transfers.
    Store,
}

impl Unit {
    /// All queues in pipeline order.
    pub const ALL: [Self; 3] = [Self::Load, Self::Compute, Self::Store];

    /// Upstream neighbour.
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self {
            Self::Load => None,
            Self::Compute => Some(Self::Load),
            Self::Store => Some(Self::Compute),
        }
    }

    /// Downstream neighbour.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Load => Some(Self::Compute),
            Self::Compute => Some(Self::Store),
            Self::Store => None,
        }
    }

    /// Position in [`Unit::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Compute => "compute",
            Self::Store => "store",
        })
    }
}

/// Directed token channel between two adjacent queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum Channel {
    LoadToCompute,
    ComputeToLoad,
    ComputeToStore,
    StoreToCompute,
}

impl Channel {
    /// Every channel.
    pub const ALL: [Self; 4] = [
        Self::LoadToCompute,
        Self::ComputeToLoad,
        Self::ComputeToStore,
        Self::StoreToCompute,
    ];

    /// Channel carrying tokens from `producer` to `consumer`, if adjacent.
    #[must_use]
    pub const fn between(producer: Unit, consumer: Unit) -> Option<Self> {
        match (producer, consumer) {
            (Unit::Load, Unit::Compute) => Some(Self::LoadToCompute),
            (Unit::Compute, Unit::Load) => Some(Self::ComputeToLoad),
            (Unit::Compute, Unit::Store) => Some(Self::ComputeToStore),
            (Unit::Store, Unit::Compute) => Some(Self::StoreToCompute),
            _ => None,
        }
    }

    /// Queue that pushes tokens.
    #[must_use]
    pub const fn producer(self) -> Unit {
        match self {
            Self::LoadToCompute => Unit::Load,
            Self::ComputeToLoad | Self::ComputeToStore => Unit::Compute,
            Self::StoreToCompute => Unit::Store,
        }
    }

    /// Queue that pops tokens.
    #[must_use]
    pub const fn consumer(self) -> Unit {
        match self {
            Self::ComputeToLoad => Unit::Load,
            Self::LoadToCompute | Self::StoreToCompute => Unit::Compute,
            Self::ComputeToStore => Unit::Store,
        }
    }

    /// Position in [`Channel::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.producer(), self.consumer())
    }
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Route {
    /// Instruction opcode.
    pub opcode: Opcode,
    /// Buffer for loads and stores, `None` for the other opcodes.
    pub memory_type: Option<MemoryId>,
    /// Destination queue.
    pub unit: Unit,
}

impl Route {
    const fn new(opcode: Opcode, memory_type: Option<MemoryId>, unit: Unit) -> Self {
        Self {
            opcode,
            memory_type,
            unit,
        }
    }
}

/// Queue assignment of the VTA instruction fetch module.
pub const DEFAULT_ROUTES: &[Route] = &[
    Route::new(Opcode::Load, Some(MemoryId::Inp), Unit::Load),
    Route::new(Opcode::Load, Some(MemoryId::Wgt), Unit::Load),
    Route::new(Opcode::Load, Some(MemoryId::Uop), Unit::Compute),
    Route::new(Opcode::Load, Some(MemoryId::Acc), Unit::Compute),
    Route::new(Opcode::Store, Some(MemoryId::Out), Unit::Store),
    Route::new(Opcode::Gemm, None, Unit::Compute),
    Route::new(Opcode::Alu, None, Unit::Compute),
    Route::new(Opcode::Finish, None, Unit::Compute),
];

/// Routing table keyed by (opcode, memory region).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct QueueMap {
    routes: Vec<Route>,
}

impl QueueMap {
    /// Builds a table from explicit routes. Earlier rows win.
    #[must_use]
    pub fn new(routes: impl Into<Vec<Route>>) -> Self {
        Self {
            routes: routes.into(),
        }
    }

    /// The VTA instruction-fetch routing.
    #[must_use]
    pub fn vta() -> Self {
        Self::new(DEFAULT_ROUTES)
    }

    /// Queue for an (opcode, region) pair.
    #[must_use]
    pub fn route(&self, opcode: Opcode, memory_type: Option<MemoryId>) -> Option<Unit> {
        self.routes
            .iter()
            .find(|route| route.opcode == opcode && route.memory_type == memory_type)
            .map(|route| route.unit)
    }

    /// Queue for an instruction.
    #[must_use]
    pub fn unit_of(&self, insn: &Instruction) -> Option<Unit> {
        self.route(insn.opcode(), insn.memory_type())
    }

    /// Table rows in lookup order.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

impl Default for QueueMap {
    fn default() -> Self {
        Self::vta()
    }
}

/// Token channels an instruction pops before issue and pushes on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handshake {
    pops: [Option<Channel>; 2],
    pushes: [Option<Channel>; 2],
}

impl Handshake {
    /// Resolves dependency bits on `unit` into channels.
    ///
    /// # Errors
    ///
    /// Returns the name of the first flag that points at a missing neighbour.
    pub fn resolve(unit: Unit, deps: DepFlags) -> Result<Self, &'static str> {
        Ok(Self {
            pops: [
                link(deps.pop_prev, "pop_prev", unit.prev().map(|prev| (prev, unit)))?,
                link(deps.pop_next, "pop_next", unit.next().map(|next| (next, unit)))?,
            ],
            pushes: [
                link(deps.push_prev, "push_prev", unit.prev().map(|prev| (unit, prev)))?,
                link(deps.push_next, "push_next", unit.next().map(|next| (unit, next)))?,
            ],
        })
    }

    /// Channels that must hold a token before issue.
    pub fn pops(&self) -> impl Iterator<Item = Channel> + '_ {
        self.pops.iter().flatten().copied()
    }

    /// Channels that receive a token on completion.
    pub fn pushes(&self) -> impl Iterator<Item = Channel> + '_ {
        self.pushes.iter().flatten().copied()
    }
}

fn link(
    set: bool,
    name: &'static str,
    ends: Option<(Unit, Unit)>,
) -> Result<Option<Channel>, &'static str> {
    if !set {
        return Ok(None);
    }
    ends.and_then(|(producer, consumer)| Channel::between(producer, consumer))
        .map(Some)
        .ok_or(name)
}
