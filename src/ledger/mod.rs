// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod accounts;
pub mod address;
pub mod rpc;
pub mod transaction;

#[cfg(test)]
pub mod mock;
