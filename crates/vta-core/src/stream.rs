//! Dependency-checked instruction stream construction.

use tracing::debug;

use crate::deps::{match_dependencies, route_program, DependencyPair};
use crate::encoder::encode;
use crate::encoding::{AluOpcode, MemoryId, Opcode, INSTRUCTION_BYTES};
use crate::error::BuildError;
use crate::instruction::{AluInsn, DepFlags, Instruction, MemInsn, RawInstruction};
use crate::memory::DramOffset;
use crate::queue::QueueMap;
use crate::schedule::TokenScheduler;

/// Accumulates instructions in program order and validates them as a whole.
#[derive(Debug, Clone, Default)]
pub struct StreamBuilder {
    map: QueueMap,
    program: Vec<Instruction>,
}

impl StreamBuilder {
    /// Builder using the VTA queue routing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder using a custom queue routing.
    #[must_use]
    pub const fn with_queue_map(map: QueueMap) -> Self {
        Self {
            map,
            program: Vec::new(),
        }
    }

    /// Appends an instruction.
    pub fn push(&mut self, insn: Instruction) -> &mut Self {
        self.program.push(insn);
        self
    }

    /// Appends a one-dimensional LOAD or STORE.
    pub fn load_store(
        &mut self,
        opcode: Opcode,
        region: MemoryId,
        sram_offset: u32,
        dram_offset: DramOffset,
        size: u32,
        deps: DepFlags,
    ) -> &mut Self {
        self.push(Instruction::Mem(MemInsn::linear(
            opcode,
            region,
            sram_offset,
            dram_offset,
            size,
            deps,
        )))
    }

    /// Appends an element-wise ALU operation.
    pub fn alu(
        &mut self,
        alu_opcode: AluOpcode,
        vector_size: u32,
        use_imm: bool,
        imm: i16,
        uop_compression: bool,
        deps: DepFlags,
    ) -> &mut Self {
        self.push(Instruction::Alu(AluInsn::vector(
            alu_opcode,
            vector_size,
            use_imm,
            imm,
            uop_compression,
            deps,
        )))
    }

    /// Appends the end-of-program marker.
    pub fn finish(&mut self, pop_prev: bool, pop_next: bool) -> &mut Self {
        self.push(Instruction::finish(pop_prev, pop_next))
    }

    /// Number of instructions appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.program.len()
    }

    /// Returns true when nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Instructions appended so far.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.program
    }

    /// Validates and encodes the program.
    ///
    /// # Errors
    ///
    /// - [`BuildError::MisplacedFinish`] / [`BuildError::MissingFinish`] when
    ///   FINISH is not exactly the last instruction.
    /// - [`BuildError::Encode`] when an instruction does not encode.
    /// - [`BuildError::Unroutable`] / [`BuildError::DanglingDependency`] from
    ///   queue routing.
    /// - [`BuildError::DependencyMismatch`] when a channel is unbalanced.
    /// - [`BuildError::Deadlock`] when the queues can never drain.
    pub fn build(&self) -> Result<InstructionStream, BuildError> {
        self.check_finish()?;

        let records = self
            .program
            .iter()
            .enumerate()
            .map(|(index, insn)| -> Result<RawInstruction, BuildError> {
                let raw = encode(insn).map_err(|source| BuildError::Encode { index, source })?;
                debug!(index, insn = %insn, raw = %raw, "encoded instruction");
                Ok(raw)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let routed = route_program(&self.program, &self.map)?;
        let pairs = match_dependencies(&routed)?;
        let schedule_cycles = TokenScheduler::new(&routed).drain()?;

        debug!(
            instructions = records.len(),
            pairs = pairs.len(),
            schedule_cycles,
            "instruction stream built"
        );
        Ok(InstructionStream {
            instructions: self.program.clone(),
            records,
            pairs,
            schedule_cycles,
        })
    }

    fn check_finish(&self) -> Result<(), BuildError> {
        let last = self.program.len().checked_sub(1);
        match self.program.iter().position(Instruction::is_finish) {
            Some(index) if Some(index) == last => Ok(()),
            Some(index) => Err(BuildError::MisplacedFinish {
                index,
                trailing: self.program.len() - index - 1,
            }),
            None => Err(BuildError::MissingFinish),
        }
    }
}

/// A validated, densely packed instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
    records: Vec<RawInstruction>,
    pairs: Vec<DependencyPair>,
    schedule_cycles: u64,
}

impl InstructionStream {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true for an empty stream. Built streams are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Instructions in program order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Encoded records in program order.
    #[must_use]
    pub fn records(&self) -> &[RawInstruction] {
        &self.records
    }

    /// Matched push/pop pairs, ordered by producer.
    #[must_use]
    pub fn pairs(&self) -> &[DependencyPair] {
        &self.pairs
    }

    /// Cycles the token model needed to drain every queue.
    #[must_use]
    pub const fn schedule_cycles(&self) -> u64 {
        self.schedule_cycles
    }

    /// Size of the record array in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.records.len() * INSTRUCTION_BYTES
    }

    /// The record array in wire order.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.records
            .iter()
            .flat_map(|record| record.to_bytes())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::StreamBuilder;
    use crate::{
        BuildError, Channel, DepFlags, DramOffset, EncodeError, MemoryId, Opcode, QueueMap, Route,
        Unit, INSTRUCTION_BYTES,
    };

    fn offset(region: MemoryId) -> DramOffset {
        DramOffset::from_elements(region, 0)
    }

    #[test]
    fn empty_builder_is_missing_finish() {
        assert_eq!(StreamBuilder::new().build(), Err(BuildError::MissingFinish));
    }

    #[test]
    fn finish_only_stream_is_one_record() {
        let stream = StreamBuilder::new().finish(false, false).build().unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.byte_len(), INSTRUCTION_BYTES);
        assert_eq!(stream.to_bytes()[0], 3);
        assert!(stream.pairs().is_empty());
    }

    #[test]
    fn instruction_after_finish_is_misplaced() {
        let mut builder = StreamBuilder::new();
        builder
            .finish(false, false)
            .load_store(Opcode::Load, MemoryId::Acc, 0, offset(MemoryId::Acc), 1, DepFlags::NONE)
            .finish(false, false);
        assert_eq!(
            builder.build(),
            Err(BuildError::MisplacedFinish {
                index: 0,
                trailing: 2,
            })
        );
    }

    #[test]
    fn encode_failures_carry_the_index() {
        let mut builder = StreamBuilder::new();
        builder
            .load_store(Opcode::Load, MemoryId::Acc, 0, offset(MemoryId::Uop), 1, DepFlags::NONE)
            .finish(false, false);
        assert_eq!(
            builder.build(),
            Err(BuildError::Encode {
                index: 0,
                source: EncodeError::RegionMismatch {
                    region: MemoryId::Acc,
                    offset: MemoryId::Uop,
                },
            })
        );
    }

    #[test]
    fn unbalanced_push_is_rejected() {
        let mut builder = StreamBuilder::new();
        builder
            .load_store(
                Opcode::Load,
                MemoryId::Inp,
                0,
                offset(MemoryId::Inp),
                1,
                DepFlags::NONE.with_push_next(),
            )
            .finish(false, false);
        assert_eq!(
            builder.build(),
            Err(BuildError::DependencyMismatch {
                channel: Channel::LoadToCompute,
                pushes: 1,
                pops: 0,
            })
        );
    }

    #[test]
    fn pop_before_push_on_the_same_queue_deadlocks() {
        let mut builder = StreamBuilder::new();
        builder
            .load_store(
                Opcode::Load,
                MemoryId::Uop,
                0,
                offset(MemoryId::Uop),
                1,
                DepFlags::NONE.with_pop_next(),
            )
            .load_store(
                Opcode::Load,
                MemoryId::Acc,
                0,
                offset(MemoryId::Acc),
                1,
                DepFlags::NONE.with_push_next(),
            )
            .load_store(
                Opcode::Store,
                MemoryId::Out,
                0,
                offset(MemoryId::Out),
                1,
                DepFlags::NONE.with_pop_prev().with_push_prev(),
            )
            .finish(false, false);
        assert_eq!(
            builder.build(),
            Err(BuildError::Deadlock {
                index: 0,
                unit: Unit::Compute,
            })
        );
    }

    #[test]
    fn custom_queue_map_changes_routing() {
        let map = QueueMap::new(vec![Route {
            opcode: Opcode::Finish,
            memory_type: None,
            unit: Unit::Compute,
        }]);
        let mut builder = StreamBuilder::with_queue_map(map);
        builder
            .load_store(Opcode::Load, MemoryId::Acc, 0, offset(MemoryId::Acc), 1, DepFlags::NONE)
            .finish(false, false);
        assert_eq!(
            builder.build(),
            Err(BuildError::Unroutable {
                index: 0,
                opcode: Opcode::Load,
                region: Some(MemoryId::Acc),
            })
        );
    }
}
