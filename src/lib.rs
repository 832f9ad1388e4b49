//! # sau — Scriptable AUdio
//!
//! `sau` compiles a small declarative scripting language into a fixed
//! timeline of oscillator events and renders it to 16-bit stereo PCM.
//! A script defines operators (`O <wave>`), schedules them in time with
//! waits (`\`) and groups (`|`), and wires them together with FM/PM/AM
//! modulation scopes (`~[...]`, `+[...]`).
//!
//! ## Pipeline
//!
//! ```text
//! source text -> Scanner -> Parser -> ParseGraph
//!                                         |
//!                                    ScriptLowering (lower.rs)
//!                                         v
//!                                     Program (program.rs)
//!                                         |
//!                                     Generator (generator.rs)
//!                                         v
//!                              AudioSink (sink.rs: WAV / device)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sau::diagnostics::DiagnosticSink;
//! use sau::generator::Generator;
//! use sau::lower::lower;
//! use sau::parser::Parser;
//! use sau::symtab::SymTab;
//!
//! let mut syms = SymTab::new();
//! let mut diags = DiagnosticSink::new();
//! let (graph, defaults) = Parser::new("Osin t0.1 f440", &mut syms, &mut diags).parse();
//! let program = lower(graph, defaults, "example".into(), &mut diags).unwrap();
//! let mut gen = Generator::new(&program, 44100);
//! let mut buf = [0i16; 512];
//! let (frames, _eof) = gen.run(&mut buf);
//! assert!(frames > 0);
//! ```
//!
//! ## Non-goals
//!
//! No Turing-complete scripting (no user functions, no loops, no script
//! I/O), no real-time hard-deadline scheduling, no MIDI/OSC/plugin
//! hosting, no pattern mini-notation or live-coding REPL.

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod generator;
pub mod lower;
pub mod notes;
pub mod parser;
pub mod program;
pub mod ramp;
pub mod scanner;
pub mod sink;
pub mod symtab;
pub mod wave;
