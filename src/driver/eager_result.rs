// Copyright the graphbolt authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;

use crate::driver::Record;
use crate::summary::Summary;
use crate::value::ValueReceive;

/// A result stream collected into memory.
#[derive(Debug)]
pub struct EagerResult {
    pub keys: Vec<Arc<String>>,
    pub records: Vec<Record>,
    pub summary: Summary,
}

impl EagerResult {
    /// Assuming the result contains exactly one record with exactly one
    /// value, return that value.
    pub fn into_scalar(mut self) -> StdResult<ValueReceive, ScalarError> {
        match self.records.len() {
            0 => Err(ScalarError::NoRecord),
            1 => match self.keys.len() {
                0 => Err(ScalarError::NoValue),
                1 => {
                    let record = self.records.pop().unwrap();
                    Ok(record.into_values().next().unwrap())
                }
                _ => Err(ScalarError::MoreThanOneValue),
            },
            _ => Err(ScalarError::MoreThanOneRecord),
        }
    }

    /// Assuming the result contains exactly one record, return that record.
    pub fn into_single(self) -> StdResult<Record, ScalarError> {
        match self.records.len() {
            0 => Err(ScalarError::NoRecord),
            1 => Ok(self.records.into_iter().next().unwrap()),
            _ => Err(ScalarError::MoreThanOneRecord),
        }
    }

    /// Turn the result into a vector of value rows, dropping keys and
    /// summary.
    pub fn into_values(self) -> Vec<Vec<ValueReceive>> {
        self.records
            .into_iter()
            .map(|record| record.into_values().collect())
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ScalarError {
    #[error("expected exactly one record, found none")]
    NoRecord,
    #[error("expected exactly one record, found more")]
    MoreThanOneRecord,
    #[error("expected record to have exactly one value, found none")]
    NoValue,
    #[error("expected record to have exactly one value, found more")]
    MoreThanOneValue,
}
