//! Request/response use cases around the ledger: order upload, withdrawal and
//! account queries. Callers pass an already authenticated user id.

mod error;
mod queries;
mod upload;
mod withdraw;

pub use error::{UploadError, WithdrawError};
pub use queries::AccountQueries;
pub use upload::{UploadOrder, UploadStatus};
pub use withdraw::Withdraw;
