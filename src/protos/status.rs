// Copyright 2023 The SeamDB Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::TransactionStatus;

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            TransactionStatus::Aborted | TransactionStatus::AppliedInAllInvolvedTablets => true,
            TransactionStatus::Created
            | TransactionStatus::Pending
            | TransactionStatus::Committed
            | TransactionStatus::Sealed
            | TransactionStatus::Promoted
            | TransactionStatus::Applying
            | TransactionStatus::AppliedInOneOfInvolvedTablets
            | TransactionStatus::ImmediateCleanup
            | TransactionStatus::GracefulCleanup => false,
        }
    }

    /// Whether records of this status go through replication of status tablet.
    pub fn is_replicated(self) -> bool {
        match self {
            TransactionStatus::Created
            | TransactionStatus::Pending
            | TransactionStatus::Promoted
            | TransactionStatus::Sealed
            | TransactionStatus::Committed
            | TransactionStatus::Aborted
            | TransactionStatus::AppliedInAllInvolvedTablets => true,
            TransactionStatus::Applying
            | TransactionStatus::AppliedInOneOfInvolvedTablets
            | TransactionStatus::ImmediateCleanup
            | TransactionStatus::GracefulCleanup => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use test_case::test_case;

    use super::*;

    #[test_case(TransactionStatus::Aborted, true, true)]
    #[test_case(TransactionStatus::AppliedInAllInvolvedTablets, true, true)]
    #[test_case(TransactionStatus::Committed, false, true)]
    #[test_case(TransactionStatus::Pending, false, true)]
    #[test_case(TransactionStatus::Applying, false, false)]
    #[test_case(TransactionStatus::AppliedInOneOfInvolvedTablets, false, false)]
    fn test_status_classes(status: TransactionStatus, terminal: bool, replicated: bool) {
        assert_that!(status.is_terminal()).is_equal_to(terminal);
        assert_that!(status.is_replicated()).is_equal_to(replicated);
    }
}
