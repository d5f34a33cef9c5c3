//! Feed-forward network inference for rocketbots control policies.
//!
//! Networks are stacks of dense layers evaluated with a single activation
//! function. Topology is fixed once a network is built; evaluation is
//! deterministic and allocation-light. The crate also owns the textual
//! network description format used by the world file and by external
//! trainers.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Activation applied after every layer's affine transform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    #[default]
    Tanh,
    Sigmoid,
    Relu,
    Identity,
}

impl Activation {
    #[inline]
    fn apply(self, value: f32) -> f32 {
        match self {
            Self::Tanh => value.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-value).exp()),
            Self::Relu => value.max(0.0),
            Self::Identity => value,
        }
    }
}

/// Errors raised when evaluating or recombining networks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrainError {
    #[error("expected {expected} network inputs, got {actual}")]
    InputSize { expected: usize, actual: usize },
    #[error("networks must share a topology to be combined")]
    TopologyMismatch,
}

/// Errors raised while building a network or parsing its description.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("i/o error reading network description: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: malformed dimension header {header:?}")]
    BadHeader { line: usize, header: String },
    #[error("line {line}: expected {expected} values, got {actual}")]
    BadRow {
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("line {line}: {value:?} is not a number")]
    BadNumber { line: usize, value: String },
    #[error("layer {index} expects {expected} inputs but the previous layer produces {actual}")]
    MismatchedTopology {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("layer dimensions must be non-zero")]
    ZeroSizedLayer,
    #[error("layer shape wants {expected} values, got {actual}")]
    BadShape { expected: usize, actual: usize },
    #[error("network description contains no layers")]
    Empty,
    #[error("unexpected end of file inside a layer block")]
    Truncated,
}

/// One dense layer: a row-major `rows x cols` weight matrix plus one bias per
/// output row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    rows: usize,
    cols: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Layer {
    /// Build a layer from row-major weights and a bias vector.
    pub fn new(rows: usize, cols: usize, weights: Vec<f32>, bias: Vec<f32>) -> Result<Self, FormatError> {
        if rows == 0 || cols == 0 {
            return Err(FormatError::ZeroSizedLayer);
        }
        if weights.len() != rows * cols {
            return Err(FormatError::BadShape {
                expected: rows * cols,
                actual: weights.len(),
            });
        }
        if bias.len() != rows {
            return Err(FormatError::BadShape {
                expected: rows,
                actual: bias.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            weights,
            bias,
        })
    }

    /// Number of output rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of input columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    fn forward(&self, input: &[f32], activation: Activation, out: &mut Vec<f32>) {
        out.clear();
        out.reserve(self.rows);
        for row in 0..self.rows {
            let weights = &self.weights[row * self.cols..(row + 1) * self.cols];
            let mut acc = self.bias[row];
            for (weight, value) in weights.iter().zip(input) {
                acc += weight * value;
            }
            out.push(activation.apply(acc));
        }
    }
}

/// A fixed-topology feed-forward network.
///
/// `Clone` performs a full deep copy; robots are routinely cloned and their
/// networks mutated independently, so copies must never alias.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeuralNetwork {
    layers: Vec<Layer>,
    activation: Activation,
}

impl NeuralNetwork {
    /// Build a network from an ordered layer stack.
    pub fn new(layers: Vec<Layer>, activation: Activation) -> Result<Self, FormatError> {
        if layers.is_empty() {
            return Err(FormatError::Empty);
        }
        let mut expected = layers[0].cols;
        for (index, layer) in layers.iter().enumerate() {
            if layer.cols != expected {
                return Err(FormatError::MismatchedTopology {
                    index,
                    expected: layer.cols,
                    actual: expected,
                });
            }
            expected = layer.rows;
        }
        Ok(Self { layers, activation })
    }

    /// Width of the expected input vector.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.layers[0].cols
    }

    /// Width of the produced output vector.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].rows
    }

    /// Evaluate the network for one input vector.
    ///
    /// A wrong-sized input is a caller error; policies validate widths when
    /// they are built so this never fires during stepping.
    pub fn compute(&self, input: &[f32]) -> Result<Vec<f32>, BrainError> {
        if input.len() != self.input_size() {
            return Err(BrainError::InputSize {
                expected: self.input_size(),
                actual: input.len(),
            });
        }
        let mut current = input.to_vec();
        let mut next = Vec::new();
        for layer in &self.layers {
            layer.forward(&current, self.activation, &mut next);
            std::mem::swap(&mut current, &mut next);
        }
        Ok(current)
    }

    /// Perturb `changes` randomly chosen weights by up to `±amount` each.
    pub fn mutate(&mut self, rng: &mut dyn RngCore, changes: usize, amount: f32) {
        for _ in 0..changes {
            let layer_idx = rng.random_range(0..self.layers.len());
            let layer = &mut self.layers[layer_idx];
            let delta = rng.random::<f32>() * amount * 2.0 - amount;
            let slot = rng.random_range(0..layer.weights.len() + layer.bias.len());
            if slot < layer.weights.len() {
                layer.weights[slot] += delta;
            } else {
                layer.bias[slot - layer.weights.len()] += delta;
            }
        }
    }

    /// Combine two networks of identical topology: the first half of the
    /// layer stack comes from `self`, the remainder from `other`.
    pub fn crossover(&self, other: &Self) -> Result<Self, BrainError> {
        if self.layers.len() != other.layers.len()
            || self
                .layers
                .iter()
                .zip(&other.layers)
                .any(|(a, b)| a.rows != b.rows || a.cols != b.cols)
        {
            return Err(BrainError::TopologyMismatch);
        }
        let split = self.layers.len() / 2;
        let layers = self
            .layers
            .iter()
            .take(split)
            .chain(other.layers.iter().skip(split))
            .cloned()
            .collect();
        Ok(Self {
            layers,
            activation: self.activation,
        })
    }

    /// Load a network description from a file, using the default activation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        Self::from_reader(File::open(path)?, Activation::default())
    }

    /// Parse a network description from any reader.
    pub fn from_reader(reader: impl Read, activation: Activation) -> Result<Self, FormatError> {
        let mut parser = Parser::new(BufReader::new(reader));
        let mut layers = Vec::new();
        while let Some((line, header)) = parser.next_content_line()? {
            let mut parts = header.split_whitespace();
            let rows = parse_dim(parts.next(), line, &header)?;
            let cols = parse_dim(parts.next(), line, &header)?;
            if parts.next().is_some() || rows == 0 || cols == 0 {
                return Err(FormatError::BadHeader {
                    line,
                    header: header.clone(),
                });
            }
            let mut weights = Vec::with_capacity(rows * cols);
            for _ in 0..rows {
                parser.read_values(cols, &mut weights)?;
            }
            let mut bias = Vec::with_capacity(rows);
            parser.read_values(rows, &mut bias)?;
            layers.push(Layer::new(rows, cols, weights, bias)?);
        }
        Self::new(layers, activation)
    }

    /// Parse a network description from a string.
    pub fn parse(text: &str, activation: Activation) -> Result<Self, FormatError> {
        Self::from_reader(text.as_bytes(), activation)
    }

    /// Write the network description to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), io::Error> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)
    }

    /// Serialize the network in the textual layer-block format.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), io::Error> {
        for (index, layer) in self.layers.iter().enumerate() {
            if index > 0 {
                writeln!(writer)?;
            }
            writeln!(writer, "# layer {index}")?;
            writeln!(writer, "{} {}", layer.rows, layer.cols)?;
            for row in 0..layer.rows {
                let weights = &layer.weights[row * layer.cols..(row + 1) * layer.cols];
                writeln!(writer, "{}", join_values(weights))?;
            }
            writeln!(writer, "{}", join_values(&layer.bias))?;
        }
        Ok(())
    }
}

fn parse_dim(token: Option<&str>, line: usize, header: &str) -> Result<usize, FormatError> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| FormatError::BadHeader {
            line,
            header: header.to_string(),
        })
}

fn join_values(values: &[f32]) -> String {
    let mut out = String::new();
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{value}"));
    }
    out
}

/// Line-oriented reader that skips blanks and `#` comments while tracking
/// line numbers for error reporting.
struct Parser<R> {
    lines: io::Lines<R>,
    line: usize,
}

impl<R: BufRead> Parser<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Next non-blank, non-comment line, or `None` at end of input.
    fn next_content_line(&mut self) -> Result<Option<(usize, String)>, FormatError> {
        for raw in self.lines.by_ref() {
            self.line += 1;
            let raw = raw?;
            let content = raw.split('#').next().unwrap_or("").trim();
            if !content.is_empty() {
                return Ok(Some((self.line, content.to_string())));
            }
        }
        Ok(None)
    }

    /// Read exactly `count` floats from the next content line.
    fn read_values(&mut self, count: usize, out: &mut Vec<f32>) -> Result<(), FormatError> {
        let Some((line, content)) = self.next_content_line()? else {
            return Err(FormatError::Truncated);
        };
        let mut seen = 0usize;
        for token in content.split_whitespace() {
            let value: f32 = token.parse().map_err(|_| FormatError::BadNumber {
                line,
                value: token.to_string(),
            })?;
            out.push(value);
            seen += 1;
        }
        if seen != count {
            out.truncate(out.len() - seen);
            return Err(FormatError::BadRow {
                line,
                expected: count,
                actual: seen,
            });
        }
        Ok(())
    }
}
