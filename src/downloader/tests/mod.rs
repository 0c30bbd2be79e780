//! Integration-style tests driving the full downloader against scripted providers.
