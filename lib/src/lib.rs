// Copyright 2021 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(unused_must_use)]

pub mod backend;
pub mod commit_graph;
pub mod dag_walk;
pub mod filter;
pub mod local_backend;
pub mod lock;
pub mod ref_store;
pub mod repo;
pub mod settings;
pub mod simple_ref_store;
pub mod sparse;
pub mod transaction;
pub mod trees;
