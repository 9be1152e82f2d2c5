// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common span builders and collaborators for integration tests

#![allow(dead_code)]

pub mod builders;
pub mod mocks;
