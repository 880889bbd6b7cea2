// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial Wallet Server - multi-chain custody, swaps and price streaming
//!
//! Holds encrypted signing keys for BTC, ETH, SOL and XLM wallets, sends
//! native transfers with a double-entry ledger, brokers quoted swaps between
//! a user's wallets and fans price ticks out to WebSocket clients.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum), WebSocket stream, OpenAPI
//! - `auth` - Local accounts, JWT bearer tokens, TOTP
//! - `blockchain` - Chain adapters (Esplora, JSON-RPC, Solana RPC, Horizon)
//! - `services` - Wallet, exchange, KYC, user and analytics engines
//! - `storage` - Embedded redb databases and repositories
//! - `price_feed`, `pubsub` - Price polling and in-process fan-out
//! - `monitor` - Confirmation tracking and quote expiry

pub mod api;
pub mod auth;
pub mod blockchain;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod monitor;
pub mod price_feed;
pub mod pubsub;
pub mod retry;
pub mod services;
pub mod state;
pub mod storage;
