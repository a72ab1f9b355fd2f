/// Status code type alias, kept as a small integer so codes stay cheap to
/// copy into sticky-error slots.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const INVALID_ARG: status_code_t = 2;
    pub const INVALID_CONFIG: status_code_t = 3;
    pub const IO_ERROR: status_code_t = 4;
    pub const UNKNOWN: status_code_t = 999;
}

/// Object-storage backend status codes (1xxx).
pub mod BackendCode {
    use super::status_code_t;

    pub const IO_ERROR: status_code_t = 1000;
    pub const NOT_FOUND: status_code_t = 1001;
    pub const HEAD_FAILED: status_code_t = 1002;
    pub const GET_FAILED: status_code_t = 1003;
    pub const PUT_FAILED: status_code_t = 1004;
    pub const DELETE_FAILED: status_code_t = 1005;
    pub const LIST_FAILED: status_code_t = 1006;
    pub const MULTIPART_INIT_FAILED: status_code_t = 1007;
    pub const PART_UPLOAD_FAILED: status_code_t = 1008;
    pub const MULTIPART_COMPLETE_FAILED: status_code_t = 1009;
    pub const MULTIPART_ABORT_FAILED: status_code_t = 1010;
    pub const UPLOAD_NOT_FOUND: status_code_t = 1011;
    pub const BUCKET_CREATE_FAILED: status_code_t = 1012;
    pub const FAULT_INJECTED: status_code_t = 1013;
}

/// Data-path engine status codes (2xxx).
pub mod DataCode {
    use super::status_code_t;

    pub const UPLOAD_FAILED: status_code_t = 2000;
    pub const FLUSH_FAILED: status_code_t = 2001;
    pub const MANIFEST_CORRUPT: status_code_t = 2002;
    pub const CODEC_ERROR: status_code_t = 2003;
    pub const FILE_TOO_LARGE: status_code_t = 2004;
}

/// Filesystem shell status codes (3xxx).
pub mod FsCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_A_DIRECTORY: status_code_t = 3001;
    pub const NOT_A_FILE: status_code_t = 3002;
    pub const ALREADY_EXISTS: status_code_t = 3003;
    pub const NOT_EMPTY: status_code_t = 3004;
    pub const HANDLE_NOT_FOUND: status_code_t = 3005;
    pub const INVALID_NAME: status_code_t = 3006;
}

/// Render a status code as a grouped, human-readable name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::IO_ERROR => "IoError",
        StatusCode::UNKNOWN => "Unknown",

        BackendCode::IO_ERROR => "Backend::IoError",
        BackendCode::NOT_FOUND => "Backend::NotFound",
        BackendCode::HEAD_FAILED => "Backend::HeadFailed",
        BackendCode::GET_FAILED => "Backend::GetFailed",
        BackendCode::PUT_FAILED => "Backend::PutFailed",
        BackendCode::DELETE_FAILED => "Backend::DeleteFailed",
        BackendCode::LIST_FAILED => "Backend::ListFailed",
        BackendCode::MULTIPART_INIT_FAILED => "Backend::MultipartInitFailed",
        BackendCode::PART_UPLOAD_FAILED => "Backend::PartUploadFailed",
        BackendCode::MULTIPART_COMPLETE_FAILED => "Backend::MultipartCompleteFailed",
        BackendCode::MULTIPART_ABORT_FAILED => "Backend::MultipartAbortFailed",
        BackendCode::UPLOAD_NOT_FOUND => "Backend::UploadNotFound",
        BackendCode::BUCKET_CREATE_FAILED => "Backend::BucketCreateFailed",
        BackendCode::FAULT_INJECTED => "Backend::FaultInjected",

        DataCode::UPLOAD_FAILED => "Data::UploadFailed",
        DataCode::FLUSH_FAILED => "Data::FlushFailed",
        DataCode::MANIFEST_CORRUPT => "Data::ManifestCorrupt",
        DataCode::CODEC_ERROR => "Data::CodecError",
        DataCode::FILE_TOO_LARGE => "Data::FileTooLarge",

        FsCode::NOT_FOUND => "Fs::NotFound",
        FsCode::NOT_A_DIRECTORY => "Fs::NotADirectory",
        FsCode::NOT_A_FILE => "Fs::NotAFile",
        FsCode::ALREADY_EXISTS => "Fs::AlreadyExists",
        FsCode::NOT_EMPTY => "Fs::NotEmpty",
        FsCode::HANDLE_NOT_FOUND => "Fs::HandleNotFound",
        FsCode::INVALID_NAME => "Fs::InvalidName",

        _ => "Unrecognized",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_known_codes() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(BackendCode::NOT_FOUND), "Backend::NotFound");
        assert_eq!(to_string(DataCode::UPLOAD_FAILED), "Data::UploadFailed");
        assert_eq!(to_string(FsCode::NOT_EMPTY), "Fs::NotEmpty");
    }

    #[test]
    fn test_to_string_unrecognized() {
        assert_eq!(to_string(4242), "Unrecognized");
    }

    #[test]
    fn test_code_groups_do_not_overlap() {
        assert!(StatusCode::UNKNOWN < BackendCode::IO_ERROR);
        assert!(BackendCode::FAULT_INJECTED < DataCode::UPLOAD_FAILED);
        assert!(DataCode::FILE_TOO_LARGE < FsCode::NOT_FOUND);
    }
}
