// This file is part of the terraform-provider-otc project
//
// Copyright (C) ANEO, 2024-2024. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License")
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

use anyhow::Result;
use tf_provider::serve;

mod client;
mod compute;
mod config;
mod dms;
mod kms;
mod lts;
mod provider;
mod resource;
mod s3;
mod sdrs;
mod tags;
mod timeouts;
mod utils;
mod vbs;
mod vpc;
mod wait;
mod waf;

use provider::CloudProvider;

#[tokio::main]
async fn main() -> Result<()> {
    serve("otc", CloudProvider::default()).await
}
