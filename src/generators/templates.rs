//! Structural templates for every construction kind.
//!
//! These produce circuits with the gate layout of each kind (entangling
//! chains, oracle/diffuser blocks, Fourier ladders, variational layers with
//! free symbols). Numeric fidelity to any particular textbook construction
//! is not a goal; structural variety is.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::{BaseParams, CircuitBuilder, GeneratorId, ParamSet};
use crate::circuit::{Circuit, Instruction, Param};
use crate::error::{CircuitError, StepError};

/// Built-in template for one [`GeneratorId`].
#[derive(Debug, Clone, Copy)]
pub struct Template {
    id: GeneratorId,
}

impl Template {
    pub fn new(id: GeneratorId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> GeneratorId {
        self.id
    }

    /// Smallest width the template can be built with.
    pub fn min_width(&self) -> usize {
        match self.id {
            GeneratorId::GroverVChain => 3,
            GeneratorId::AmplitudeEstimation
            | GeneratorId::DeutschJozsa
            | GeneratorId::GroverNoAncilla
            | GeneratorId::Qaoa
            | GeneratorId::QuantumWalk
            | GeneratorId::Qpe => 2,
            _ => 1,
        }
    }

    fn parameter_error(&self, reason: String) -> StepError {
        StepError::Parameters {
            generator: self.id,
            reason,
        }
    }
}

impl CircuitBuilder for Template {
    fn derive_parameters(
        &self,
        base: &BaseParams,
        rng: &mut ChaCha8Rng,
    ) -> Result<ParamSet, StepError> {
        let min_width = base.min_width.max(self.min_width());
        if min_width > base.max_width {
            return Err(self.parameter_error(format!(
                "needs width >= {} but max_width is {}",
                min_width, base.max_width
            )));
        }
        let min_depth = base.min_depth.max(1);
        if min_depth > base.max_depth {
            return Err(self.parameter_error(format!(
                "min_depth {} exceeds max_depth {}",
                min_depth, base.max_depth
            )));
        }
        let min_reps = base.min_reps.max(1);
        if min_reps > base.max_reps {
            return Err(self.parameter_error(format!(
                "min_reps {} exceeds max_reps {}",
                min_reps, base.max_reps
            )));
        }

        let width = rng.random_range(min_width..=base.max_width);
        let depth = rng.random_range(min_depth..=base.max_depth);
        let reps = rng.random_range(min_reps..=base.max_reps);
        let seed = rng.random::<u64>();

        let mut values = BTreeMap::new();
        match self.id {
            GeneratorId::Qpe => {
                values.insert("phase".to_string(), rng.random::<f64>());
            }
            GeneratorId::AmplitudeEstimation => {
                values.insert("probability".to_string(), rng.random_range(0.05..0.95));
            }
            GeneratorId::DeutschJozsa => {
                values.insert("balanced".to_string(), f64::from(rng.random_range(0..2u8)));
            }
            GeneratorId::GroverNoAncilla | GeneratorId::GroverVChain => {
                values.insert("marked".to_string(), f64::from(rng.random::<u32>()));
            }
            _ => {}
        }

        Ok(ParamSet {
            width,
            depth,
            reps,
            measure: base.measure,
            seed,
            values,
        })
    }

    fn build(&self, params: &ParamSet) -> Result<Circuit, StepError> {
        let n = params.width;
        if n < self.min_width() {
            return Err(StepError::Build {
                generator: self.id,
                reason: format!("width {} below minimum {}", n, self.min_width()),
            });
        }
        let secondary = if params.measure { n } else { 0 };
        let mut c = Circuit::new(format!("{}_{}", self.id, n), n, secondary);
        let value = |key: &str| params.values.get(key).copied().unwrap_or_default();

        match self.id {
            GeneratorId::Ghz => ghz(&mut c, n)?,
            GeneratorId::WState => w_state(&mut c, n)?,
            GeneratorId::GraphState => graph_state(&mut c, n, params.seed)?,
            GeneratorId::RandomCircuit => random_layers(&mut c, n, params.depth, params.seed)?,
            GeneratorId::EfficientSu2 => efficient_su2(&mut c, n, params.reps)?,
            GeneratorId::RealAmplitudes => real_amplitudes(&mut c, n, params.reps, "theta")?,
            GeneratorId::TwoLocal => two_local(&mut c, n, params.reps)?,
            GeneratorId::AmplitudeEstimation => {
                amplitude_estimation(&mut c, n, value("probability"))?
            }
            GeneratorId::DeutschJozsa => {
                deutsch_jozsa(&mut c, n, value("balanced") >= 0.5, params.seed)?
            }
            GeneratorId::GroverNoAncilla => {
                grover_no_ancilla(&mut c, n, params.reps, value("marked") as u64)?
            }
            GeneratorId::GroverVChain => {
                grover_v_chain(&mut c, n, params.reps, value("marked") as u64)?
            }
            GeneratorId::Qaoa => qaoa(&mut c, n, params.reps)?,
            GeneratorId::Qft => {
                let qubits: Vec<usize> = (0..n).collect();
                fourier(&mut c, &qubits, false)?
            }
            GeneratorId::Qnn => qnn(&mut c, n, params.reps)?,
            GeneratorId::QuantumWalk => quantum_walk(&mut c, n, params.reps)?,
            GeneratorId::Qpe => qpe(&mut c, n, value("phase"))?,
            GeneratorId::Vqe => vqe(&mut c, n, params.reps)?,
        }

        if params.measure {
            c.push_separator();
            for q in 0..n {
                c.push(Instruction::new("measure", vec![q]).with_secondary(vec![q]))?;
            }
        }
        Ok(c)
    }
}

/// Hands out uniquely numbered free symbols.
struct Symbols {
    prefix: &'static str,
    next: usize,
}

impl Symbols {
    fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    fn next(&mut self) -> Param {
        let p = Param::Symbol(format!("{}_{}", self.prefix, self.next));
        self.next += 1;
        p
    }
}

fn gate(c: &mut Circuit, op: &str, targets: Vec<usize>) -> Result<(), CircuitError> {
    c.push(Instruction::new(op, targets))
}

fn rotation(c: &mut Circuit, op: &str, targets: Vec<usize>, p: Param) -> Result<(), CircuitError> {
    c.push(Instruction::new(op, targets).with_params(vec![p]))
}

fn linear_chain(c: &mut Circuit, n: usize, op: &str) -> Result<(), CircuitError> {
    for i in 0..n.saturating_sub(1) {
        gate(c, op, vec![i, i + 1])?;
    }
    Ok(())
}

fn ghz(c: &mut Circuit, n: usize) -> Result<(), CircuitError> {
    gate(c, "h", vec![0])?;
    linear_chain(c, n, "cx")
}

fn w_state(c: &mut Circuit, n: usize) -> Result<(), CircuitError> {
    if n == 1 {
        return gate(c, "x", vec![0]);
    }
    let angle = |k: usize| 2.0 * (1.0 / (n - k) as f64).sqrt().acos();
    rotation(c, "ry", vec![0], Param::Value(angle(0)))?;
    for k in 1..n - 1 {
        rotation(c, "cry", vec![k - 1, k], Param::Value(angle(k)))?;
    }
    for k in (1..n).rev() {
        gate(c, "cx", vec![k - 1, k])?;
    }
    gate(c, "x", vec![0])
}

fn graph_state(c: &mut Circuit, n: usize, seed: u64) -> Result<(), CircuitError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for q in 0..n {
        gate(c, "h", vec![q])?;
    }
    for i in 0..n {
        for j in i + 1..n {
            if rng.random::<f64>() < 0.5 {
                gate(c, "cz", vec![i, j])?;
            }
        }
    }
    Ok(())
}

fn random_layers(c: &mut Circuit, n: usize, depth: usize, seed: u64) -> Result<(), CircuitError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for _ in 0..depth {
        let mut q = 0;
        while q < n {
            if q + 1 < n && rng.random::<f64>() < 0.3 {
                gate(c, "cx", vec![q, q + 1])?;
                q += 2;
                continue;
            }
            match rng.random_range(0..4u8) {
                0 => gate(c, "h", vec![q])?,
                1 => gate(c, "x", vec![q])?,
                2 => gate(c, "sx", vec![q])?,
                _ => rotation(
                    c,
                    "rz",
                    vec![q],
                    Param::Value(rng.random_range(0.0..2.0 * PI)),
                )?,
            }
            q += 1;
        }
    }
    Ok(())
}

fn efficient_su2(c: &mut Circuit, n: usize, reps: usize) -> Result<(), CircuitError> {
    let mut theta = Symbols::new("theta");
    for r in 0..=reps {
        for q in 0..n {
            rotation(c, "ry", vec![q], theta.next())?;
            rotation(c, "rz", vec![q], theta.next())?;
        }
        if r < reps {
            linear_chain(c, n, "cx")?;
        }
    }
    Ok(())
}

fn real_amplitudes(
    c: &mut Circuit,
    n: usize,
    reps: usize,
    prefix: &'static str,
) -> Result<(), CircuitError> {
    let mut theta = Symbols::new(prefix);
    for r in 0..=reps {
        for q in 0..n {
            rotation(c, "ry", vec![q], theta.next())?;
        }
        if r < reps {
            for i in (0..n.saturating_sub(1)).rev() {
                gate(c, "cx", vec![i, i + 1])?;
            }
        }
    }
    Ok(())
}

fn two_local(c: &mut Circuit, n: usize, reps: usize) -> Result<(), CircuitError> {
    let mut theta = Symbols::new("theta");
    for r in 0..=reps {
        for q in 0..n {
            rotation(c, "ry", vec![q], theta.next())?;
        }
        if r < reps {
            linear_chain(c, n, "cz")?;
        }
    }
    Ok(())
}

/// Fourier ladder over `qubits`; `inverse` mirrors it with negated angles.
fn fourier(c: &mut Circuit, qubits: &[usize], inverse: bool) -> Result<(), CircuitError> {
    let m = qubits.len();
    let swaps = |c: &mut Circuit| -> Result<(), CircuitError> {
        for i in 0..m / 2 {
            gate(c, "swap", vec![qubits[i], qubits[m - 1 - i]])?;
        }
        Ok(())
    };

    if inverse {
        swaps(c)?;
        for j in (0..m).rev() {
            for k in (j + 1..m).rev() {
                let angle = -PI / f64::from(1u32 << (k - j).min(31));
                rotation(c, "cp", vec![qubits[k], qubits[j]], Param::Value(angle))?;
            }
            gate(c, "h", vec![qubits[j]])?;
        }
    } else {
        for j in 0..m {
            gate(c, "h", vec![qubits[j]])?;
            for k in j + 1..m {
                let angle = PI / f64::from(1u32 << (k - j).min(31));
                rotation(c, "cp", vec![qubits[k], qubits[j]], Param::Value(angle))?;
            }
        }
        swaps(c)?;
    }
    Ok(())
}

fn amplitude_estimation(c: &mut Circuit, n: usize, probability: f64) -> Result<(), CircuitError> {
    let objective = n - 1;
    let eval: Vec<usize> = (0..objective).collect();
    let theta = probability.clamp(0.0, 1.0).sqrt().asin();

    rotation(c, "ry", vec![objective], Param::Value(2.0 * theta))?;
    for &q in &eval {
        gate(c, "h", vec![q])?;
    }
    for (j, &q) in eval.iter().enumerate() {
        let power = f64::from(1u32 << j.min(31));
        rotation(c, "cry", vec![q, objective], Param::Value(2.0 * power * theta))?;
    }
    fourier(c, &eval, true)
}

fn deutsch_jozsa(c: &mut Circuit, n: usize, balanced: bool, seed: u64) -> Result<(), CircuitError> {
    let out = n - 1;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    gate(c, "x", vec![out])?;
    for q in 0..n {
        gate(c, "h", vec![q])?;
    }
    if balanced {
        gate(c, "cx", vec![0, out])?;
        for q in 1..out {
            if rng.random::<f64>() < 0.5 {
                gate(c, "cx", vec![q, out])?;
            }
        }
    } else if rng.random::<f64>() < 0.5 {
        gate(c, "x", vec![out])?;
    }
    for q in 0..out {
        gate(c, "h", vec![q])?;
    }
    Ok(())
}

fn flip_unmarked(c: &mut Circuit, data: usize, marked: u64) -> Result<(), CircuitError> {
    for q in 0..data {
        if (marked >> q.min(63)) & 1 == 0 {
            gate(c, "x", vec![q])?;
        }
    }
    Ok(())
}

fn layer(c: &mut Circuit, data: usize, op: &str) -> Result<(), CircuitError> {
    for q in 0..data {
        gate(c, op, vec![q])?;
    }
    Ok(())
}

fn grover_no_ancilla(c: &mut Circuit, n: usize, reps: usize, marked: u64) -> Result<(), CircuitError> {
    let all: Vec<usize> = (0..n).collect();
    layer(c, n, "h")?;
    for _ in 0..reps {
        flip_unmarked(c, n, marked)?;
        gate(c, "mcz", all.clone())?;
        flip_unmarked(c, n, marked)?;

        layer(c, n, "h")?;
        layer(c, n, "x")?;
        gate(c, "mcz", all.clone())?;
        layer(c, n, "x")?;
        layer(c, n, "h")?;
    }
    Ok(())
}

/// Multi-controlled Z over data qubits `0..k`, decomposed with ancillas `k..2k-2`.
fn v_chain_cz(c: &mut Circuit, k: usize) -> Result<(), CircuitError> {
    if k == 2 {
        return gate(c, "cz", vec![0, 1]);
    }
    let anc = |i: usize| k + i;
    let compute = |c: &mut Circuit| -> Result<(), CircuitError> {
        gate(c, "ccx", vec![0, 1, anc(0)])?;
        for i in 2..k - 1 {
            gate(c, "ccx", vec![anc(i - 2), i, anc(i - 1)])?;
        }
        Ok(())
    };
    let uncompute = |c: &mut Circuit| -> Result<(), CircuitError> {
        for i in (2..k - 1).rev() {
            gate(c, "ccx", vec![anc(i - 2), i, anc(i - 1)])?;
        }
        gate(c, "ccx", vec![0, 1, anc(0)])
    };

    compute(c)?;
    gate(c, "cz", vec![anc(k - 3), k - 1])?;
    uncompute(c)
}

fn grover_v_chain(c: &mut Circuit, n: usize, reps: usize, marked: u64) -> Result<(), CircuitError> {
    // k data qubits need k - 2 ancillas; any leftover qubit stays idle.
    let data = (n + 2) / 2;
    layer(c, data, "h")?;
    for _ in 0..reps {
        flip_unmarked(c, data, marked)?;
        v_chain_cz(c, data)?;
        flip_unmarked(c, data, marked)?;

        layer(c, data, "h")?;
        layer(c, data, "x")?;
        v_chain_cz(c, data)?;
        layer(c, data, "x")?;
        layer(c, data, "h")?;
    }
    Ok(())
}

fn qaoa(c: &mut Circuit, n: usize, reps: usize) -> Result<(), CircuitError> {
    let edges: Vec<(usize, usize)> = if n > 2 {
        (0..n).map(|i| (i, (i + 1) % n)).collect()
    } else {
        vec![(0, 1)]
    };
    layer(c, n, "h")?;
    for p in 0..reps {
        let gamma = Param::symbol(format!("gamma_{}", p));
        let beta = Param::symbol(format!("beta_{}", p));
        for &(u, v) in &edges {
            rotation(c, "rzz", vec![u, v], gamma.clone())?;
        }
        for q in 0..n {
            rotation(c, "rx", vec![q], beta.clone())?;
        }
    }
    Ok(())
}

fn qnn(c: &mut Circuit, n: usize, reps: usize) -> Result<(), CircuitError> {
    let mut x = Symbols::new("x");
    for q in 0..n {
        gate(c, "h", vec![q])?;
        rotation(c, "p", vec![q], x.next())?;
    }
    linear_chain(c, n, "cx")?;
    real_amplitudes(c, n, reps, "w")
}

fn quantum_walk(c: &mut Circuit, n: usize, steps: usize) -> Result<(), CircuitError> {
    let coin = 0;
    // Increment then decrement the position register, controlled on the coin.
    let shift = |c: &mut Circuit| -> Result<(), CircuitError> {
        for t in (1..n).rev() {
            let mut targets = vec![coin];
            targets.extend(1..t);
            targets.push(t);
            gate(c, "mcx", targets)?;
        }
        Ok(())
    };
    for _ in 0..steps {
        gate(c, "h", vec![coin])?;
        shift(c)?;
        gate(c, "x", vec![coin])?;
        shift(c)?;
        gate(c, "x", vec![coin])?;
    }
    Ok(())
}

fn qpe(c: &mut Circuit, n: usize, phase: f64) -> Result<(), CircuitError> {
    let target = n - 1;
    let eval: Vec<usize> = (0..target).collect();
    gate(c, "x", vec![target])?;
    for &q in &eval {
        gate(c, "h", vec![q])?;
    }
    for (j, &q) in eval.iter().enumerate() {
        let power = f64::from(1u32 << j.min(31));
        let angle = 2.0 * PI * phase * power;
        rotation(c, "cp", vec![q, target], Param::Value(angle))?;
    }
    fourier(c, &eval, true)
}

fn vqe(c: &mut Circuit, n: usize, reps: usize) -> Result<(), CircuitError> {
    let mut theta = Symbols::new("theta");
    for _ in 0..reps {
        for q in 0..n {
            rotation(c, "ry", vec![q], theta.next())?;
            rotation(c, "rz", vec![q], theta.next())?;
        }
        for i in 0..n {
            for j in i + 1..n {
                gate(c, "cx", vec![i, j])?;
            }
        }
    }
    for q in 0..n {
        rotation(c, "ry", vec![q], theta.next())?;
    }
    Ok(())
}
