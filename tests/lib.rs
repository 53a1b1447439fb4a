//! Workspace integration tests. Each test provisions a throwaway database
//! from `TEST_DATABASE_URL` and skips silently when it is not set.
