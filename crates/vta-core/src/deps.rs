//! Routing of a program onto the queues and push/pop pair matching.

use crate::error::BuildError;
use crate::instruction::Instruction;
use crate::queue::{Channel, Handshake, QueueMap, Unit};

/// An instruction placed on its queue with resolved token channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutedInstruction {
    /// Program-order index.
    pub index: usize,
    /// Queue the instruction executes on.
    pub unit: Unit,
    /// Token channels popped and pushed.
    pub handshake: Handshake,
    /// Whether this is the end-of-program marker.
    pub is_finish: bool,
}

/// A push matched with the pop that consumes its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DependencyPair {
    /// Program-order index of the pushing instruction.
    pub producer: usize,
    /// Program-order index of the popping instruction.
    pub consumer: usize,
    /// Channel the token travels on.
    pub channel: Channel,
}

/// Routes every instruction and resolves its dependency bits to channels.
///
/// # Errors
///
/// Returns [`BuildError::Unroutable`] when the map has no queue for an
/// instruction and [`BuildError::DanglingDependency`] when a flag points at
/// a queue neighbour that does not exist.
pub fn route_program(
    program: &[Instruction],
    map: &QueueMap,
) -> Result<Vec<RoutedInstruction>, BuildError> {
    program
        .iter()
        .enumerate()
        .map(|(index, insn)| -> Result<RoutedInstruction, BuildError> {
            let unit = map.unit_of(insn).ok_or(BuildError::Unroutable {
                index,
                opcode: insn.opcode(),
                region: insn.memory_type(),
            })?;
            let handshake = Handshake::resolve(unit, insn.deps())
                .map_err(|flag| BuildError::DanglingDependency { index, unit, flag })?;
            Ok(RoutedInstruction {
                index,
                unit,
                handshake,
                is_finish: insn.is_finish(),
            })
        })
        .collect()
}

/// Pairs every push with exactly one pop on the same channel.
///
/// Tokens are counted FIFO per channel, so the k-th push pairs with the k-th
/// pop. Pairs are returned ordered by producer.
///
/// # Errors
///
/// Returns [`BuildError::DependencyMismatch`] for the first channel whose
/// push and pop counts differ.
pub fn match_dependencies(
    routed: &[RoutedInstruction],
) -> Result<Vec<DependencyPair>, BuildError> {
    let mut pushes: [Vec<usize>; 4] = Default::default();
    let mut pops: [Vec<usize>; 4] = Default::default();
    for insn in routed {
        for channel in insn.handshake.pushes() {
            pushes[channel.index()].push(insn.index);
        }
        for channel in insn.handshake.pops() {
            pops[channel.index()].push(insn.index);
        }
    }

    let mut pairs = Vec::new();
    for channel in Channel::ALL {
        let (producers, consumers) = (&pushes[channel.index()], &pops[channel.index()]);
        if producers.len() != consumers.len() {
            return Err(BuildError::DependencyMismatch {
                channel,
                pushes: producers.len(),
                pops: consumers.len(),
            });
        }
        pairs.extend(
            producers
                .iter()
                .zip(consumers)
                .map(|(&producer, &consumer)| DependencyPair {
                    producer,
                    consumer,
                    channel,
                }),
        );
    }
    pairs.sort_unstable();
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::{match_dependencies, route_program, DependencyPair};
    use crate::{
        AluInsn, AluOpcode, BuildError, Channel, DepFlags, DramOffset, Instruction, MemInsn,
        MemoryId, Opcode, QueueMap, Unit,
    };

    fn mem(opcode: Opcode, region: MemoryId, deps: DepFlags) -> Instruction {
        Instruction::Mem(MemInsn::linear(
            opcode,
            region,
            0,
            DramOffset::from_elements(region, 0),
            1,
            deps,
        ))
    }

    #[test]
    fn store_after_alu_pairs_on_compute_to_store() {
        let program = [
            Instruction::Alu(AluInsn::vector(
                AluOpcode::Add,
                1,
                true,
                1,
                false,
                DepFlags::NONE.with_push_next(),
            )),
            mem(Opcode::Store, MemoryId::Out, DepFlags::NONE.with_pop_prev()),
            Instruction::finish(false, false),
        ];
        let routed = route_program(&program, &QueueMap::vta()).unwrap();
        assert_eq!(routed[1].unit, Unit::Store);
        assert!(routed[2].is_finish);
        assert_eq!(
            match_dependencies(&routed).unwrap(),
            [DependencyPair {
                producer: 0,
                consumer: 1,
                channel: Channel::ComputeToStore,
            }]
        );
    }

    #[test]
    fn unmatched_push_is_a_mismatch() {
        let program = [mem(Opcode::Load, MemoryId::Inp, DepFlags::NONE.with_push_next())];
        let routed = route_program(&program, &QueueMap::vta()).unwrap();
        assert_eq!(
            match_dependencies(&routed),
            Err(BuildError::DependencyMismatch {
                channel: Channel::LoadToCompute,
                pushes: 1,
                pops: 0,
            })
        );
    }

    #[test]
    fn routing_errors_carry_the_index() {
        let unroutable = [
            Instruction::finish(false, false),
            mem(Opcode::Store, MemoryId::Acc, DepFlags::NONE),
        ];
        assert_eq!(
            route_program(&unroutable, &QueueMap::vta()),
            Err(BuildError::Unroutable {
                index: 1,
                opcode: Opcode::Store,
                region: Some(MemoryId::Acc),
            })
        );

        let dangling = [mem(Opcode::Load, MemoryId::Inp, DepFlags::NONE.with_pop_prev())];
        assert_eq!(
            route_program(&dangling, &QueueMap::vta()),
            Err(BuildError::DanglingDependency {
                index: 0,
                unit: Unit::Load,
                flag: "pop_prev",
            })
        );
    }

    #[test]
    fn repeated_tokens_pair_in_fifo_order() {
        let push = DepFlags::NONE.with_push_next();
        let pop = DepFlags::NONE.with_pop_prev();
        let program = [
            mem(Opcode::Load, MemoryId::Inp, push),
            mem(Opcode::Load, MemoryId::Wgt, push),
            mem(Opcode::Load, MemoryId::Uop, pop),
            mem(Opcode::Load, MemoryId::Acc, pop),
        ];
        let routed = route_program(&program, &QueueMap::vta()).unwrap();
        let pairs = match_dependencies(&routed).unwrap();
        assert_eq!(
            pairs.iter().map(|p| (p.producer, p.consumer)).collect::<Vec<_>>(),
            [(0, 2), (1, 3)]
        );
    }
}
